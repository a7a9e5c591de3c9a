// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use flakehunt_runner::{
    engine::{ExecutionEngine, ResultSink, TestSelection},
    errors::{EngineError, InstrumentationError},
    instrumentation::InstrumentationProvider,
    result_processor::{FailureCause, FailureKind},
    round::RoundMode,
    run_dir::{REPORT_FILE_NAME, RUN_LOG_FILE_NAME, SUMMARY_FILE_NAME},
    test_id::{TestDescriptor, TestId},
};
use std::collections::BTreeMap;

pub(crate) fn test_id(name: &str) -> TestId {
    let (class, method) = name.split_once('#').expect("test names are class#method");
    TestId::new(class, method)
}

/// The rounds a scripted outcome applies to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum Round {
    Baseline,
    Seeded(usize),
}

impl From<RoundMode> for Round {
    fn from(mode: RoundMode) -> Self {
        match mode {
            RoundMode::Baseline => Round::Baseline,
            RoundMode::Seeded { index, .. } => Round::Seeded(index),
        }
    }
}

/// An engine that reports a fixed set of tests, passing unless scripted to fail.
#[derive(Debug, Default)]
pub(crate) struct ScriptedEngine {
    tests: Vec<TestDescriptor>,
    failures: BTreeMap<(Round, TestId), FailureKind>,
    error_at: Option<Round>,
    ignore_selection: bool,

    /// Every round the engine was asked to execute, in order.
    pub(crate) invocations: Vec<RoundMode>,
}

impl ScriptedEngine {
    pub(crate) fn new<'a>(tests: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            tests: tests
                .into_iter()
                .map(|name| TestDescriptor::new(test_id(name)))
                .collect(),
            ..Default::default()
        }
    }

    pub(crate) fn with_test(mut self, test: TestDescriptor) -> Self {
        self.tests.push(test);
        self
    }

    pub(crate) fn fail(self, round: Round, name: &str) -> Self {
        self.fail_with(round, name, FailureKind::Assertion)
    }

    pub(crate) fn fail_with(mut self, round: Round, name: &str, kind: FailureKind) -> Self {
        self.failures.insert((round, test_id(name)), kind);
        self
    }

    pub(crate) fn error_at(mut self, round: Round) -> Self {
        self.error_at = Some(round);
        self
    }

    /// Report every test, even ones the retry filter excludes from seeded rounds.
    pub(crate) fn ignore_selection(mut self) -> Self {
        self.ignore_selection = true;
        self
    }

    pub(crate) fn seeded_invocations(&self) -> Vec<(usize, u64)> {
        self.invocations
            .iter()
            .filter_map(|mode| Some((mode.index()?, mode.seed()?)))
            .collect()
    }
}

impl ExecutionEngine for ScriptedEngine {
    fn execute(
        &mut self,
        selection: &TestSelection<'_>,
        sink: &mut dyn ResultSink,
    ) -> Result<(), EngineError> {
        let mode = selection.round().mode();
        self.invocations.push(mode);
        let round = Round::from(mode);
        if self.error_at == Some(round) {
            return Err(EngineError::Aborted {
                reason: "scripted engine error".to_owned(),
            });
        }

        for test in &self.tests {
            if !self.ignore_selection && !selection.includes(test) {
                continue;
            }
            match self.failures.get(&(round, test.id().clone())) {
                Some(kind) => sink.on_test_failed(test, &FailureCause::new(*kind)),
                None => sink.on_test_passed(test),
            }
        }
        Ok(())
    }
}

/// Instrumentation that counts how often it was asked to materialize.
#[derive(Debug, Default)]
pub(crate) struct CountingInstrumentation {
    pub(crate) calls: usize,
    pub(crate) fail: bool,
}

impl InstrumentationProvider for CountingInstrumentation {
    fn materialize(&mut self, artifact_dir: &Utf8Path) -> Result<(), InstrumentationError> {
        self.calls += 1;
        if self.fail {
            return Err(InstrumentationError::Command {
                command: "instrument".to_owned(),
                error: std::io::Error::other("agent build failed"),
            });
        }
        std::fs::create_dir_all(artifact_dir).map_err(|error| InstrumentationError::CreateDir {
            dir: artifact_dir.to_owned(),
            error,
        })
    }
}

/// Instrumentation that, once the run directory exists, occupies the paths of the run log,
/// report and summary with directories so that none of them can be written.
#[derive(Debug)]
pub(crate) struct ArtifactBlockingInstrumentation {
    pub(crate) runs_dir: Utf8PathBuf,
}

impl InstrumentationProvider for ArtifactBlockingInstrumentation {
    fn materialize(&mut self, artifact_dir: &Utf8Path) -> Result<(), InstrumentationError> {
        let create_dir = |dir: &Utf8Path| {
            std::fs::create_dir_all(dir).map_err(|error| InstrumentationError::CreateDir {
                dir: dir.to_owned(),
                error,
            })
        };
        create_dir(artifact_dir)?;

        let entries = self
            .runs_dir
            .read_dir_utf8()
            .map_err(|error| InstrumentationError::CreateDir {
                dir: self.runs_dir.clone(),
                error,
            })?;
        for entry in entries {
            let entry = entry.map_err(|error| InstrumentationError::CreateDir {
                dir: self.runs_dir.clone(),
                error,
            })?;
            for name in [RUN_LOG_FILE_NAME, REPORT_FILE_NAME, SUMMARY_FILE_NAME] {
                create_dir(&entry.path().join(name))?;
            }
        }
        Ok(())
    }
}
