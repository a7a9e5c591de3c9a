// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Materialization of the instrumentation artifact.
//!
//! The instrumentation artifact is whatever makes a seed change the runtime behavior of the
//! code under test. flakehunt does not interpret it: an [`InstrumentationProvider`] places it
//! in the artifact directory once per run, before the baseline round, and each round's worker
//! is told where to find it.

use crate::{config::CommandSpec, errors::InstrumentationError};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

/// Places the instrumentation artifact in a directory.
pub trait InstrumentationProvider {
    /// Materializes the artifact into `artifact_dir`.
    ///
    /// The directory may not exist yet. After this returns successfully, it must.
    fn materialize(&mut self, artifact_dir: &Utf8Path) -> Result<(), InstrumentationError>;
}

/// A provider that only creates the artifact directory.
///
/// Used when the engine itself knows how to perturb the code under test.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoInstrumentation;

impl InstrumentationProvider for NoInstrumentation {
    fn materialize(&mut self, artifact_dir: &Utf8Path) -> Result<(), InstrumentationError> {
        create_artifact_dir(artifact_dir)
    }
}

/// A provider that runs a command, passing the artifact directory as its final argument.
#[derive(Clone, Debug)]
pub struct CommandInstrumentation {
    command: CommandSpec,
    cwd: Option<Utf8PathBuf>,
}

impl CommandInstrumentation {
    /// Creates a new provider that runs `command` in the current directory.
    pub fn new(command: CommandSpec) -> Self {
        Self { command, cwd: None }
    }

    /// Runs the command in `cwd` instead, typically the workspace root.
    pub fn with_cwd(mut self, cwd: impl Into<Utf8PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

impl InstrumentationProvider for CommandInstrumentation {
    fn materialize(&mut self, artifact_dir: &Utf8Path) -> Result<(), InstrumentationError> {
        create_artifact_dir(artifact_dir)?;

        let args = self
            .command
            .args
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(artifact_dir.as_str()));
        debug!(
            "running instrumentation command: {} {artifact_dir}",
            self.command
        );
        let mut expression = duct::cmd(&self.command.program, args).stdout_null();
        if let Some(cwd) = &self.cwd {
            expression = expression.dir(cwd.as_std_path());
        }
        expression
            .run()
            .map_err(|error| InstrumentationError::Command {
                command: self.command.to_string(),
                error,
            })?;

        Ok(())
    }
}

fn create_artifact_dir(artifact_dir: &Utf8Path) -> Result<(), InstrumentationError> {
    std::fs::create_dir_all(artifact_dir).map_err(|error| InstrumentationError::CreateDir {
        dir: artifact_dir.to_owned(),
        error,
    })
}
