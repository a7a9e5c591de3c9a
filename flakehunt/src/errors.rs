// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING, StderrStyles};
use camino::{FromPathBufError, Utf8PathBuf};
use flakehunt_metadata::FlakehuntExitCode;
use flakehunt_runner::errors::*;
use owo_colors::OwoColorize;
use std::error::Error;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// Note that the #[error()] strings are mostly placeholder messages -- the expected way to print out
// errors is with the display_to_stderr method, which colorizes errors.

/// An error that flakehunt knows how to report, each with a documented exit code.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine current directory")]
    CurrentDirFailed {
        #[source]
        err: std::io::Error,
    },
    #[error("current directory is not valid UTF-8")]
    CurrentDirInvalidUtf8 {
        #[source]
        err: FromPathBufError,
    },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("profile not found")]
    ProfileNotFound {
        #[from]
        err: ProfileNotFound,
    },
    #[error("no engine command configured")]
    EngineCommandMissing { profile: String },
    #[error("run failed")]
    OrchestratorError {
        #[from]
        err: OrchestratorError,
    },
    #[error("tests could not be retried")]
    NonRetriedTests {
        #[from]
        err: NonRetriedTestsError,
    },
    #[error("flaky tests detected")]
    FlakyTestsDetected { count: usize },
    #[error("run log read error")]
    RunLogReadError {
        run_dir: Utf8PathBuf,
        #[source]
        err: RunLogError,
    },
    #[error("error writing output")]
    WriteOutputError {
        #[source]
        err: std::io::Error,
    },
}

impl ExpectedError {
    pub(crate) fn write_output(err: std::io::Error) -> Self {
        Self::WriteOutputError { err }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirFailed { .. }
            | Self::CurrentDirInvalidUtf8 { .. }
            | Self::ConfigParseError { .. }
            | Self::ProfileNotFound { .. }
            | Self::EngineCommandMissing { .. }
            | Self::RunLogReadError { .. } => FlakehuntExitCode::SETUP_ERROR,
            Self::OrchestratorError { err } => match err {
                OrchestratorError::Engine { .. } => FlakehuntExitCode::ENGINE_FAILED,
                OrchestratorError::Instrumentation(_) => FlakehuntExitCode::INSTRUMENTATION_FAILED,
                _ => FlakehuntExitCode::SETUP_ERROR,
            },
            Self::NonRetriedTests { .. } => FlakehuntExitCode::NON_RETRIED_TESTS,
            Self::FlakyTestsDetected { .. } => FlakehuntExitCode::FLAKY_TESTS_DETECTED,
            Self::WriteOutputError { .. } => FlakehuntExitCode::WRITE_OUTPUT_ERROR,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match &self {
            Self::CurrentDirFailed { err } => {
                error!("could not determine current directory");
                Some(err as &dyn Error)
            }
            Self::CurrentDirInvalidUtf8 { err } => {
                error!(
                    "current directory `{}` is not valid UTF-8",
                    err.as_path().display().style(styles.bold)
                );
                None
            }
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse flakehunt config at `{}`",
                    err.config_file().style(styles.bold)
                );
                Some(err.kind() as &dyn Error)
            }
            Self::ProfileNotFound { err } => {
                error!("{err}");
                None
            }
            Self::EngineCommandMissing { profile } => {
                error!(
                    "no engine command configured for profile `{}`: set `{}` in the config",
                    profile.style(styles.bold),
                    "engine-command".style(styles.bold),
                );
                None
            }
            Self::OrchestratorError { err } => {
                error!("{err}");
                err.source()
            }
            Self::NonRetriedTests { err } => {
                error!("{err}");
                None
            }
            Self::FlakyTestsDetected { count } => {
                error!(
                    "{} {} only under perturbation",
                    count.style(styles.bold),
                    if *count == 1 {
                        "test failed"
                    } else {
                        "tests failed"
                    },
                );
                None
            }
            Self::RunLogReadError { run_dir, err } => {
                error!(
                    "failed to read run log for `{}`",
                    run_dir.style(styles.bold)
                );
                Some(err as &dyn Error)
            }
            Self::WriteOutputError { err } => {
                error!("error writing output");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(
                target: NO_HEADING,
                "\n{}:\n  {}",
                "Caused by".style(styles.warning_text),
                err
            );
            next_error = err.source();
        }
    }
}
