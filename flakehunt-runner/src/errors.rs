// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by flakehunt.

use crate::{
    result_processor::NonRetryReason, retry_filter::FilterRuleKind, round::ExecutionId,
    test_id::TestId,
};
use camino::Utf8PathBuf;
use config::ConfigError;
use itertools::Itertools;
use std::{error, fmt};
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse flakehunt config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a config.
///
/// Returned by [`ConfigParseError::kind`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),

    /// A retry filter in a profile could not be compiled.
    #[error("invalid retry filter in profile `{profile}`")]
    InvalidRetryFilter {
        /// The profile name.
        profile: String,

        /// The underlying error.
        #[source]
        error: RetryFilterBuildError,
    },

    /// A test name filter in a profile is not a valid regular expression.
    #[error("invalid test-name-filter `{pattern}` in profile `{profile}`")]
    InvalidTestNameFilter {
        /// The profile name.
        profile: String,

        /// The pattern that failed to compile.
        pattern: String,

        /// The underlying error.
        #[source]
        error: regex::Error,
    },
}

/// An error which indicates that a profile was requested but not known to flakehunt.
#[derive(Clone, Debug, Error)]
#[error("profile `{profile}` not found (known profiles: {})", .all_profiles.join(", "))]
pub struct ProfileNotFound {
    profile: String,
    all_profiles: Vec<String>,
}

impl ProfileNotFound {
    pub(crate) fn new(
        profile: impl Into<String>,
        all_profiles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut all_profiles: Vec<_> = all_profiles.into_iter().map(|s| s.into()).collect();
        all_profiles.sort_unstable();
        Self {
            profile: profile.into(),
            all_profiles,
        }
    }
}

/// Error returned while parsing a [`MaxFailures`](crate::config::MaxFailures) value.
#[derive(Clone, Debug, Error)]
#[error("unrecognized value for max-failures-per-test: {reason}")]
pub struct MaxFailuresParseError {
    reason: String,
}

impl MaxFailuresParseError {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Error returned while parsing a [`PerturbationMode`](crate::round::PerturbationMode) value.
#[derive(Clone, Debug, Error)]
#[error(
    "unrecognized value for perturbation mode: {input}\n(known values: {})",
    crate::round::PerturbationMode::variants().join(", "),
)]
pub struct PerturbationModeParseError {
    input: String,
}

impl PerturbationModeParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// Error returned when a [`PerturbationRange`](crate::round::PerturbationRange) has its bounds
/// reversed.
#[derive(Clone, Debug, Error)]
#[error("perturbation range start ({start}) is greater than its end ({end})")]
pub struct PerturbationRangeError {
    start: u64,
    end: u64,
}

impl PerturbationRangeError {
    pub(crate) fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }
}

/// Error returned while parsing an [`ExecutionId`] from a string.
#[derive(Debug, Error)]
#[error("invalid execution id `{input}`")]
pub struct ExecutionIdParseError {
    input: String,
    #[source]
    error: newtype_uuid::ParseError,
}

impl ExecutionIdParseError {
    pub(crate) fn new(input: impl Into<String>, error: newtype_uuid::ParseError) -> Self {
        Self {
            input: input.into(),
            error,
        }
    }
}

/// An error that occurred while compiling a glob pattern.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum GlobConstructError {
    /// The glob was invalid.
    #[error("invalid glob")]
    InvalidGlob(#[source] globset::Error),

    /// The glob could not be converted into a regular expression.
    #[error("error converting glob to regex: {0}")]
    RegexError(String),
}

/// An error that occurred while building a [`RetryFilter`](crate::retry_filter::RetryFilter).
#[derive(Clone, Debug, Error)]
#[error("invalid pattern `{pattern}` in {kind}")]
pub struct RetryFilterBuildError {
    kind: FilterRuleKind,
    pattern: String,
    #[source]
    error: GlobConstructError,
}

impl RetryFilterBuildError {
    pub(crate) fn new(
        kind: FilterRuleKind,
        pattern: impl Into<String>,
        error: GlobConstructError,
    ) -> Self {
        Self {
            kind,
            pattern: pattern.into(),
            error,
        }
    }

    /// Returns the list the invalid pattern was found in.
    pub fn kind(&self) -> FilterRuleKind {
        self.kind
    }

    /// Returns the invalid pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

/// An error returned by an [`ExecutionEngine`](crate::engine::ExecutionEngine).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// The engine process could not be started.
    #[error("failed to spawn engine command `{command}`")]
    Spawn {
        /// The command that was run.
        command: String,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The engine emitted an event that could not be parsed.
    #[error("engine emitted an invalid event at line {line_number}: {line}")]
    Protocol {
        /// The 1-based line number within the engine's output.
        line_number: usize,

        /// The line that could not be parsed.
        line: String,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// The engine exited without reporting that all outcomes were delivered.
    #[error("engine exited before reporting completion ({})", DisplayExitCode(.exit_code))]
    Incomplete {
        /// The exit code, or `None` if the engine was terminated by a signal.
        exit_code: Option<i32>,
    },

    /// The engine reported that it could not execute the round.
    #[error("engine aborted the round: {reason}")]
    Aborted {
        /// The reason reported by the engine.
        reason: String,
    },
}

struct DisplayExitCode<'a>(&'a Option<i32>);

impl fmt::Display for DisplayExitCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(code) => write!(f, "exit code {code}"),
            None => write!(f, "terminated by signal"),
        }
    }
}

/// An error returned by an
/// [`InstrumentationProvider`](crate::instrumentation::InstrumentationProvider).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InstrumentationError {
    /// The artifact directory could not be created.
    #[error("failed to create instrumentation artifact directory `{dir}`")]
    CreateDir {
        /// The artifact directory.
        dir: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The instrumentation command could not be run, or exited with a failure.
    #[error("instrumentation command `{command}` failed")]
    Command {
        /// The command that was run.
        command: String,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The provider returned successfully, but the artifact directory does not exist.
    #[error("instrumentation artifact directory `{dir}` does not exist after materialization")]
    ArtifactMissing {
        /// The artifact directory.
        dir: Utf8PathBuf,
    },
}

/// An error that occurred while creating a run directory.
#[derive(Debug, Error)]
#[error("failed to create run directory `{path}`")]
pub struct RunDirCreateError {
    path: Utf8PathBuf,
    #[source]
    error: std::io::Error,
}

impl RunDirCreateError {
    pub(crate) fn new(path: impl Into<Utf8PathBuf>, error: std::io::Error) -> Self {
        Self {
            path: path.into(),
            error,
        }
    }
}

/// An error that occurred while reading or writing a run log.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunLogError {
    /// The run log could not be created.
    #[error("failed to create run log at `{path}`")]
    Create {
        /// The run log path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// An entry could not be appended to the run log.
    #[error("failed to append to run log at `{path}`")]
    Write {
        /// The run log path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The run log could not be read.
    #[error("failed to read run log at `{path}`")]
    Read {
        /// The run log path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// A complete line in the run log is not a valid execution id.
    #[error("invalid entry at line {line_number} of run log `{path}`")]
    Parse {
        /// The run log path.
        path: Utf8PathBuf,

        /// The 1-based line number.
        line_number: usize,

        /// The underlying error.
        #[source]
        error: ExecutionIdParseError,
    },
}

/// An error that occurred while writing a report artifact.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ArtifactWriteError {
    /// A filesystem error occurred.
    #[error("error writing to `{path}`")]
    Fs {
        /// The file being written.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The JSON summary could not be serialized.
    #[error("error serializing summary to `{path}`")]
    Json {
        /// The file being written.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// The JUnit report could not be serialized.
    #[error("error writing JUnit output to `{path}`")]
    Junit {
        /// The file being written.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: quick_junit::SerializeError,
    },
}

/// An error that stopped a run from completing.
///
/// Non-retryable test failures are not errors at this level: they end the run in the
/// [`Aborted`](crate::orchestrator::OrchestratorState::Aborted) state, and are surfaced through
/// [`FlakeRunOutcome::check_non_retried`](crate::orchestrator::FlakeRunOutcome::check_non_retried).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OrchestratorError {
    /// The run directory could not be created.
    #[error(transparent)]
    RunDir(#[from] RunDirCreateError),

    /// The instrumentation artifact could not be materialized.
    #[error("failed to materialize instrumentation")]
    Instrumentation(#[from] InstrumentationError),

    /// The execution engine failed while executing a round.
    #[error("execution engine failed for round {execution_id}")]
    Engine {
        /// The execution id of the round that failed.
        execution_id: ExecutionId,

        /// The underlying error.
        #[source]
        error: EngineError,
    },
}

/// A run stopped early because flakiness could not be determined for some tests.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum NonRetriedTestsError {
    /// Some tests failed in a way that cannot be retried.
    #[error(
        "could not determine flakiness for {} {}:\n{}",
        .tests.len(),
        crate::helpers::plural::tests_str(.tests.len()),
        .tests.iter().map(|(id, reason)| format!("   {id} ({reason})")).join("\n"),
    )]
    NonRetried {
        /// The tests, along with the reason each was not retried.
        tests: Vec<(TestId, NonRetryReason)>,
    },

    /// The run was configured to stop as if a non-retryable failure had occurred.
    #[error("could not determine flakiness: run stopped by the simulate-non-retryable setting")]
    Simulated,
}

/// Displays an error along with the chain of errors that caused it, on a single line.
pub struct DisplayErrorChain<E> {
    error: E,
}

impl<E: error::Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E: error::Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        let mut next = self.error.source();
        while let Some(err) = next {
            write!(f, ": {err}")?;
            next = err.source();
        }
        Ok(())
    }
}
