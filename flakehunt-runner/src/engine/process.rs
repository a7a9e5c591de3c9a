// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{ExecutionEngine, ResultSink, TestSelection};
use crate::{
    config::CommandSpec,
    errors::EngineError,
    result_processor::{FailureCause, FailureKind},
    test_id::{TestDescriptor, TestId},
};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use smol_str::SmolStr;
use tracing::{debug, trace};

/// An [`ExecutionEngine`] that runs an external command once per round.
///
/// The command receives the round's [worker parameters](TestSelection::worker_params) as
/// environment variables. It reports outcomes on standard output as newline-delimited JSON
/// objects, each tagged with an `event` field:
///
/// ```text
/// {"event": "passed", "class": "com.example.FooTest", "method": "bar"}
/// {"event": "failed", "class": "com.example.FooTest", "method": "baz", "kind": "assertion"}
/// {"event": "skipped", "class": "com.example.FooTest", "method": "qux"}
/// {"event": "finished"}
/// ```
///
/// Lines that don't start with `{` are treated as ordinary output and ignored. The command must
/// emit `finished` once every outcome has been reported; a nonzero exit status on its own is not
/// an error, since test failures are expected.
#[derive(Clone, Debug)]
pub struct ProcessEngine {
    command: CommandSpec,
    cwd: Option<Utf8PathBuf>,
}

impl ProcessEngine {
    /// Creates a new engine that runs `command`.
    pub fn new(command: CommandSpec) -> Self {
        Self { command, cwd: None }
    }

    /// Sets the directory the command is run in.
    pub fn with_cwd(mut self, cwd: impl Into<Utf8PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Returns the command this engine runs.
    pub fn command(&self) -> &CommandSpec {
        &self.command
    }

    /// Returns the directory the command is run in, if set.
    pub fn cwd(&self) -> Option<&Utf8Path> {
        self.cwd.as_deref()
    }
}

impl ExecutionEngine for ProcessEngine {
    fn execute(
        &mut self,
        selection: &TestSelection<'_>,
        sink: &mut dyn ResultSink,
    ) -> Result<(), EngineError> {
        let mut expression = duct::cmd(&self.command.program, &self.command.args)
            .stdout_capture()
            .unchecked();
        if let Some(cwd) = &self.cwd {
            expression = expression.dir(cwd.as_std_path());
        }
        for param in selection.worker_params() {
            expression = expression.env(param.key(), param.value());
        }

        debug!(
            execution_id = %selection.round().execution_id(),
            "running engine command: {}", self.command,
        );
        let output = expression.run().map_err(|error| EngineError::Spawn {
            command: self.command.to_string(),
            error,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !parse_events(&stdout, sink)? {
            return Err(EngineError::Incomplete {
                exit_code: output.status.code(),
            });
        }
        if !output.status.success() {
            debug!("engine command exited with {}", output.status);
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
enum WorkerEvent {
    Passed {
        #[serde(flatten)]
        test: WorkerTest,
    },
    Failed {
        #[serde(flatten)]
        test: WorkerTest,
        #[serde(default)]
        kind: FailureKind,
        #[serde(default)]
        message: Option<String>,
    },
    Skipped {
        #[serde(flatten)]
        test: WorkerTest,
    },
    Aborted {
        reason: String,
    },
    Finished,
}

#[derive(Debug, Deserialize)]
struct WorkerTest {
    class: SmolStr,
    method: SmolStr,
    #[serde(default)]
    annotations: Vec<SmolStr>,
}

impl WorkerTest {
    fn into_descriptor(self) -> TestDescriptor {
        TestDescriptor::with_annotations(TestId::new(self.class, self.method), self.annotations)
    }
}

/// Delivers every event in `output` to `sink`, returning true if the `finished` event was seen.
fn parse_events(output: &str, sink: &mut dyn ResultSink) -> Result<bool, EngineError> {
    for (line_number, line) in output.lines().enumerate() {
        let line = line.trim();
        if !line.starts_with('{') {
            continue;
        }

        let event: WorkerEvent =
            serde_json::from_str(line).map_err(|error| EngineError::Protocol {
                line_number: line_number + 1,
                line: line.to_owned(),
                error,
            })?;
        trace!(?event, "engine event");

        match event {
            WorkerEvent::Passed { test } => sink.on_test_passed(&test.into_descriptor()),
            WorkerEvent::Failed {
                test,
                kind,
                message,
            } => {
                let cause = FailureCause { kind, message };
                sink.on_test_failed(&test.into_descriptor(), &cause);
            }
            WorkerEvent::Skipped { test } => sink.on_test_skipped(&test.into_descriptor()),
            WorkerEvent::Aborted { reason } => return Err(EngineError::Aborted { reason }),
            WorkerEvent::Finished => return Ok(true),
        }
    }

    Ok(false)
}
