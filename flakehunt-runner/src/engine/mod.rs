// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The boundary between flakehunt and the engine that executes tests.
//!
//! An [`ExecutionEngine`] runs the test suite once per round. Execution is synchronous: every
//! per-test outcome must be delivered to the [`ResultSink`] before
//! [`execute`](ExecutionEngine::execute) returns.

mod process;

pub use process::*;

use crate::{
    errors::EngineError,
    result_processor::FailureCause,
    retry_filter::RetryFilter,
    round::{RoundConfiguration, WorkerParam, worker_keys, worker_params},
    test_id::TestDescriptor,
};

/// Receives per-test outcomes from an [`ExecutionEngine`].
pub trait ResultSink {
    /// Called when a test passes.
    fn on_test_passed(&mut self, test: &TestDescriptor);

    /// Called when a test fails.
    fn on_test_failed(&mut self, test: &TestDescriptor, cause: &FailureCause);

    /// Called when a test is skipped. Skipped tests are neither passes nor failures.
    fn on_test_skipped(&mut self, _test: &TestDescriptor) {}
}

/// Executes the test suite for a single round.
pub trait ExecutionEngine {
    /// Executes the tests described by `selection`, reporting each outcome to `sink`.
    ///
    /// Test failures are reported through `sink`, not as errors. An error means the engine
    /// itself could not execute the round, and ends the run.
    fn execute(
        &mut self,
        selection: &TestSelection<'_>,
        sink: &mut dyn ResultSink,
    ) -> Result<(), EngineError>;
}

impl<F> ExecutionEngine for F
where
    F: FnMut(&TestSelection<'_>, &mut dyn ResultSink) -> Result<(), EngineError>,
{
    fn execute(
        &mut self,
        selection: &TestSelection<'_>,
        sink: &mut dyn ResultSink,
    ) -> Result<(), EngineError> {
        (self)(selection, sink)
    }
}

/// What an [`ExecutionEngine`] should execute for a round.
#[derive(Clone, Copy, Debug)]
pub struct TestSelection<'a> {
    round: &'a RoundConfiguration,
    filter: &'a RetryFilter,
}

impl<'a> TestSelection<'a> {
    /// Creates a new selection.
    pub fn new(round: &'a RoundConfiguration, filter: &'a RetryFilter) -> Self {
        Self { round, filter }
    }

    /// Returns the configuration of the round being executed.
    pub fn round(&self) -> &'a RoundConfiguration {
        self.round
    }

    /// Returns the retry filter.
    pub fn filter(&self) -> &'a RetryFilter {
        self.filter
    }

    /// Returns true if `test` should be executed in this round.
    ///
    /// The baseline executes every test. Seeded rounds execute only tests selected by the retry
    /// filter.
    pub fn includes(&self, test: &TestDescriptor) -> bool {
        self.round.is_baseline() || self.filter.is_selected(test)
    }

    /// Returns every parameter a worker process needs to execute this selection.
    ///
    /// This is the round's [`worker_params`], followed by the retry filter's patterns for seeded
    /// rounds. Patterns within a list are separated by newlines.
    pub fn worker_params(&self) -> Vec<WorkerParam> {
        let mut params = worker_params(self.round);
        if !self.round.is_baseline() {
            let spec = self.filter.spec();
            let lists = [
                (worker_keys::INCLUDE_CLASSES, &spec.include_classes),
                (worker_keys::INCLUDE_ANNOTATIONS, &spec.include_annotations),
                (worker_keys::EXCLUDE_CLASSES, &spec.exclude_classes),
                (worker_keys::EXCLUDE_ANNOTATIONS, &spec.exclude_annotations),
            ];
            for (key, patterns) in lists {
                if !patterns.is_empty() {
                    params.push(WorkerParam::new(key, patterns.join("\n")));
                }
            }
        }
        params
    }
}
