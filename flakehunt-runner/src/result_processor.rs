// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Classification of per-test outcomes into round results.
//!
//! The [`ResultProcessor`] sits between the execution engine's per-test callbacks and the
//! orchestrator. It accumulates outcomes for the current round, and classifies each failure as
//! either retryable or not. It is reset, not recreated, between rounds: per-test failure counts
//! carry over for the lifetime of a run.

use crate::{
    config::MaxFailures,
    engine::ResultSink,
    retry_filter::RetryFilter,
    test_id::{TestDescriptor, TestId, TestsByClass},
};
use serde::Deserialize;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
};
use tracing::debug;

/// The category of a test failure, as reported by the execution engine.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// An assertion in the test did not hold.
    #[default]
    Assertion,

    /// The test raised an unexpected error.
    Error,

    /// The test infrastructure failed, for example a worker crashed.
    InfrastructureError,

    /// The test ran out of a resource such as memory.
    ResourceExhausted,

    /// The engine refused to select the test for execution.
    SelectionRefused,
}

impl FailureKind {
    /// Returns true if a failure of this kind may be retried under a different seed.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Assertion | Self::Error)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assertion => write!(f, "assertion failure"),
            Self::Error => write!(f, "error"),
            Self::InfrastructureError => write!(f, "infrastructure error"),
            Self::ResourceExhausted => write!(f, "resource exhaustion"),
            Self::SelectionRefused => write!(f, "selection refused by engine"),
        }
    }
}

/// Why a test failed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FailureCause {
    /// The category of the failure.
    pub kind: FailureKind,

    /// A human-readable message, if the engine provided one.
    pub message: Option<String>,
}

impl FailureCause {
    /// Creates a new cause with no message.
    pub fn new(kind: FailureKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// Attaches a message to this cause.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Why a failing test was classified as non-retried.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NonRetryReason {
    /// The test has failed more times than allowed over the course of the run.
    MaxFailuresExceeded {
        /// The number of failures seen so far.
        failures: u32,

        /// The configured maximum.
        max: u32,
    },

    /// The retry filter does not select the test.
    NotSelected,

    /// The failure is of a kind that a different seed cannot affect.
    NonRetryableCause(FailureKind),
}

impl fmt::Display for NonRetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxFailuresExceeded { failures, max } => {
                write!(f, "failed {failures} times, more than the maximum of {max}")
            }
            Self::NotSelected => write!(f, "not selected by retry filter"),
            Self::NonRetryableCause(kind) => write!(f, "non-retryable {kind}"),
        }
    }
}

/// A snapshot of the outcomes of a single round.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RoundResult {
    failed_tests: TestsByClass,
    non_retried_tests: TestsByClass,
    non_retry_reasons: BTreeMap<TestId, NonRetryReason>,
    passed_tests: BTreeSet<TestId>,
    recovered_tests: BTreeSet<TestId>,
    last_round: bool,
}

impl RoundResult {
    /// Returns every test that failed in this round, grouped by class.
    pub fn failed_tests(&self) -> &TestsByClass {
        &self.failed_tests
    }

    /// Returns the failed tests that cannot be retried, grouped by class.
    ///
    /// If this is non-empty, the run stops.
    pub fn non_retried_tests(&self) -> &TestsByClass {
        &self.non_retried_tests
    }

    /// Returns the reason each non-retried test was classified as such.
    pub fn non_retry_reasons(&self) -> &BTreeMap<TestId, NonRetryReason> {
        &self.non_retry_reasons
    }

    /// Returns the tests that passed in this round.
    pub fn passed_tests(&self) -> &BTreeSet<TestId> {
        &self.passed_tests
    }

    /// Returns the tests that passed in this round after failing in an earlier round of the
    /// same run.
    pub fn recovered_tests(&self) -> &BTreeSet<TestId> {
        &self.recovered_tests
    }

    /// Returns true if this was configured to be the final round.
    pub fn last_round(&self) -> bool {
        self.last_round
    }
}

#[derive(Debug, Default)]
struct RoundAccumulator {
    failed: BTreeSet<TestId>,
    non_retried: BTreeMap<TestId, NonRetryReason>,
    passed: BTreeSet<TestId>,
}

/// Accumulates per-test outcomes into [`RoundResult`]s.
#[derive(Debug)]
pub struct ResultProcessor {
    filter: RetryFilter,
    max_failures: MaxFailures,

    // Monotonic over the lifetime of a run.
    failure_counts: HashMap<TestId, u32>,
    ever_failed: BTreeSet<TestId>,
    total_failures: usize,

    in_baseline: bool,
    last_round: bool,
    current: RoundAccumulator,
    frozen: Option<RoundResult>,
}

impl ResultProcessor {
    /// Creates a new processor, ready to receive outcomes for the baseline round.
    ///
    /// Failures in the baseline round are recorded but never classified as non-retried, and do
    /// not count towards `max_failures`.
    pub fn new(filter: RetryFilter, max_failures: MaxFailures) -> Self {
        Self {
            filter,
            max_failures,
            failure_counts: HashMap::new(),
            ever_failed: BTreeSet::new(),
            total_failures: 0,
            in_baseline: true,
            last_round: false,
            current: RoundAccumulator::default(),
            frozen: None,
        }
    }

    /// Records a failure for the current round.
    pub fn on_test_failed(&mut self, test: &TestDescriptor, cause: &FailureCause) {
        if self.frozen.is_some() {
            debug!(test = %test.id(), "ignoring failure reported after round result was read");
            return;
        }

        let id = test.id();
        self.total_failures += 1;
        let newly_failed = self.current.failed.insert(id.clone());

        if self.in_baseline {
            return;
        }

        // A test counts at most once per round, however many failures are reported for it.
        let failures = self.failure_counts.entry(id.clone()).or_default();
        if newly_failed {
            *failures += 1;
        }
        let failures = *failures;

        let reason = match self.max_failures {
            MaxFailures::Count(max) if self.max_failures.is_exceeded(failures) => {
                Some(NonRetryReason::MaxFailuresExceeded { failures, max })
            }
            _ if !self.filter.is_selected(test) => Some(NonRetryReason::NotSelected),
            _ if !cause.kind.is_retryable() => Some(NonRetryReason::NonRetryableCause(cause.kind)),
            _ => None,
        };

        if let Some(reason) = reason {
            debug!(test = %id, %reason, "test will not be retried");
            // The first reason for a test within a round is the one reported.
            self.current.non_retried.entry(id.clone()).or_insert(reason);
        }
    }

    /// Records a pass for the current round.
    pub fn on_test_passed(&mut self, test: &TestDescriptor) {
        if self.frozen.is_some() {
            debug!(test = %test.id(), "ignoring pass reported after round result was read");
            return;
        }
        self.current.passed.insert(test.id().clone());
    }

    /// Returns the result of the current round.
    ///
    /// The first call freezes the round: later calls return the same snapshot, and outcomes
    /// reported before the next [`reset`](Self::reset) are ignored.
    pub fn result(&mut self) -> &RoundResult {
        let current = &self.current;
        let ever_failed = &self.ever_failed;
        let last_round = self.last_round;
        self.frozen
            .get_or_insert_with(|| snapshot(current, ever_failed, last_round))
    }

    /// Clears per-round state in preparation for the next round.
    ///
    /// Per-test failure counts, the set of tests that have ever failed, and the total number of
    /// failures are kept. The next result will have [`last_round`](RoundResult::last_round) set to
    /// `is_last_round`.
    pub fn reset(&mut self, is_last_round: bool) {
        let current = std::mem::take(&mut self.current);
        self.ever_failed.extend(current.failed);
        self.frozen = None;
        self.in_baseline = false;
        self.last_round = is_last_round;
    }

    /// Returns the number of times the given test has failed in seeded rounds so far.
    pub fn failure_count(&self, id: &TestId) -> u32 {
        self.failure_counts.get(id).copied().unwrap_or(0)
    }

    /// Returns the total number of failures seen in this run, across all rounds.
    pub fn total_failures(&self) -> usize {
        self.total_failures
    }

    /// Returns the tests that have failed in any round before the current one.
    pub fn ever_failed(&self) -> &BTreeSet<TestId> {
        &self.ever_failed
    }
}

fn snapshot(
    current: &RoundAccumulator,
    ever_failed: &BTreeSet<TestId>,
    last_round: bool,
) -> RoundResult {
    // A failure within a round takes precedence over a pass of the same test.
    let passed_tests: BTreeSet<_> = current.passed.difference(&current.failed).cloned().collect();
    let recovered_tests = passed_tests
        .iter()
        .filter(|id| ever_failed.contains(*id))
        .cloned()
        .collect();

    RoundResult {
        failed_tests: current.failed.iter().collect(),
        non_retried_tests: current.non_retried.keys().collect(),
        non_retry_reasons: current.non_retried.clone(),
        passed_tests,
        recovered_tests,
        last_round,
    }
}

impl ResultSink for ResultProcessor {
    fn on_test_passed(&mut self, test: &TestDescriptor) {
        ResultProcessor::on_test_passed(self, test);
    }

    fn on_test_failed(&mut self, test: &TestDescriptor, cause: &FailureCause) {
        ResultProcessor::on_test_failed(self, test, cause);
    }
}
