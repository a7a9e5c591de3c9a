// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The round loop.
//!
//! A [`RoundOrchestrator`] executes one unperturbed baseline round, then up to `max_rounds`
//! seeded rounds. The loop stops early as soon as a round produces a failure that cannot be
//! retried. Once it stops, baseline failures are subtracted from every seeded round and the
//! report is generated.
//!
//! The orchestrator is constructed through a [`RoundOrchestratorBuilder`].

use crate::{
    config::{FlakehuntProfile, MaxFailures},
    engine::{ExecutionEngine, TestSelection},
    errors::{InstrumentationError, NonRetriedTestsError, OrchestratorError, RunDirCreateError},
    instrumentation::InstrumentationProvider,
    report::{FinishedRun, FlakeReport, ReportGenerator},
    reporter::{RoundEvent, RoundEventKind, RoundEventSink},
    result_processor::{NonRetryReason, ResultProcessor, RoundResult},
    retry_filter::RetryFilter,
    round::{PerturbationSettings, RoundConfiguration, RoundRecord},
    run_dir::{RunDir, artifact_dir},
    seed::{DEFAULT_BASE_SEED, seed_for_round},
    test_id::TestId,
};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Local;
use quick_junit::ReportUuid;
use std::time::Instant;
use tracing::debug;

/// The state of the round loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OrchestratorState {
    /// Nothing has executed yet.
    Init,

    /// The baseline round is executing.
    Baseline,

    /// The seeded round with this index is executing.
    Seeded(usize),

    /// The loop finished: every allowed round ran, or the run was unperturbed.
    Done,

    /// The loop stopped early because a test could not be retried.
    Aborted,
}

impl OrchestratorState {
    /// Returns true if the loop may move from this state to `next`.
    pub fn can_transition_to(self, next: OrchestratorState) -> bool {
        match (self, next) {
            (Self::Init, Self::Baseline) => true,
            (Self::Baseline, Self::Seeded(0) | Self::Done) => true,
            (Self::Seeded(index), Self::Seeded(next_index)) => next_index == index + 1,
            (Self::Seeded(_), Self::Done | Self::Aborted) => true,
            _ => false,
        }
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

#[derive(Debug)]
struct StateTracker {
    state: OrchestratorState,
}

impl StateTracker {
    fn new() -> Self {
        Self {
            state: OrchestratorState::Init,
        }
    }

    fn advance(&mut self, next: OrchestratorState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {:?} -> {next:?}",
            self.state,
        );
        debug!(from = ?self.state, to = ?next, "orchestrator state transition");
        self.state = next;
    }
}

/// Why the round loop stopped early.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AbortReason {
    /// Tests failed in a way that can't be retried.
    NonRetried(Vec<(TestId, NonRetryReason)>),

    /// The `simulate-non-retryable` override is set.
    Simulated,
}

impl AbortReason {
    /// Returns the error that describes this reason.
    pub fn to_error(&self) -> NonRetriedTestsError {
        match self {
            Self::NonRetried(tests) => NonRetriedTestsError::NonRetried {
                tests: tests.clone(),
            },
            Self::Simulated => NonRetriedTestsError::Simulated,
        }
    }
}

/// How the round loop of a run ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RunStatus {
    /// Every allowed seeded round ran.
    Completed,

    /// The loop stopped early.
    Aborted(AbortReason),
}

/// The outcome of [`RoundOrchestrator::run`].
#[derive(Clone, Debug)]
pub enum OrchestratorOutcome {
    /// `max_rounds` was zero, so the suite was executed once without perturbation. No run log
    /// or report was written.
    Unperturbed(RoundRecord),

    /// The round loop ran and the report was generated.
    Finished(FlakeRunOutcome),
}

/// The outcome of a run that executed seeded rounds.
#[derive(Clone, Debug)]
pub struct FlakeRunOutcome {
    run_id: ReportUuid,
    run_dir: Utf8PathBuf,
    status: RunStatus,
    baseline: RoundRecord,
    rounds: Vec<RoundRecord>,
    report: FlakeReport,
}

impl FlakeRunOutcome {
    /// Returns the UUID for this run.
    pub fn run_id(&self) -> ReportUuid {
        self.run_id
    }

    /// Returns the directory this run wrote to.
    pub fn run_dir(&self) -> &Utf8Path {
        &self.run_dir
    }

    /// Returns how the round loop ended.
    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    /// Returns the baseline round.
    pub fn baseline(&self) -> &RoundRecord {
        &self.baseline
    }

    /// Returns the seeded rounds that executed, with baseline failures subtracted.
    pub fn rounds(&self) -> &[RoundRecord] {
        &self.rounds
    }

    /// Returns the report.
    pub fn report(&self) -> &FlakeReport {
        &self.report
    }

    /// Returns true if any test failed only under perturbation.
    pub fn has_flaky_tests(&self) -> bool {
        !self.report.aggregate_failures().is_empty()
    }

    /// Returns an error if the loop stopped early because flakiness could not be determined.
    pub fn check_non_retried(&self) -> Result<(), NonRetriedTestsError> {
        match &self.status {
            RunStatus::Completed => Ok(()),
            RunStatus::Aborted(reason) => Err(reason.to_error()),
        }
    }
}

/// Builds a [`RoundOrchestrator`].
#[derive(Clone, Debug)]
pub struct RoundOrchestratorBuilder {
    max_rounds: u32,
    base_seed: u64,
    max_failures: MaxFailures,
    simulate_non_retryable: bool,
    perturbation: PerturbationSettings,
    retry_filter: RetryFilter,
    junit_path: Option<Utf8PathBuf>,
}

impl RoundOrchestratorBuilder {
    /// Creates a new builder for a run of up to `max_rounds` seeded rounds.
    ///
    /// Every test is retried, there is no per-test failure limit, and the default base seed is
    /// used.
    pub fn new(max_rounds: u32) -> Self {
        Self {
            max_rounds,
            base_seed: DEFAULT_BASE_SEED,
            max_failures: MaxFailures::Unlimited,
            simulate_non_retryable: false,
            perturbation: PerturbationSettings::default(),
            retry_filter: RetryFilter::all(),
            junit_path: None,
        }
    }

    /// Creates a new builder with every setting taken from `profile`.
    pub fn from_profile(profile: &FlakehuntProfile<'_>) -> Self {
        Self {
            max_rounds: profile.rounds(),
            base_seed: profile.base_seed(),
            max_failures: profile.max_failures(),
            simulate_non_retryable: profile.simulate_non_retryable(),
            perturbation: profile.perturbation(),
            retry_filter: profile.retry_filter().clone(),
            junit_path: profile.junit_path(),
        }
    }

    /// Sets the maximum number of seeded rounds. Zero means a single unperturbed execution.
    pub fn set_max_rounds(&mut self, max_rounds: u32) -> &mut Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Sets the base seed.
    pub fn set_base_seed(&mut self, base_seed: u64) -> &mut Self {
        self.base_seed = base_seed;
        self
    }

    /// Sets the number of seeded-round failures a test may have before it is no longer retried.
    pub fn set_max_failures(&mut self, max_failures: MaxFailures) -> &mut Self {
        self.max_failures = max_failures;
        self
    }

    /// If true, the loop stops after the first seeded round as though a non-retryable failure
    /// had occurred.
    pub fn set_simulate_non_retryable(&mut self, simulate: bool) -> &mut Self {
        self.simulate_non_retryable = simulate;
        self
    }

    /// Sets the perturbation settings passed to seeded rounds.
    pub fn set_perturbation(&mut self, perturbation: PerturbationSettings) -> &mut Self {
        self.perturbation = perturbation;
        self
    }

    /// Sets the retry filter.
    pub fn set_retry_filter(&mut self, retry_filter: RetryFilter) -> &mut Self {
        self.retry_filter = retry_filter;
        self
    }

    /// Sets the path to write a JUnit report to.
    pub fn set_junit_path(&mut self, junit_path: Option<Utf8PathBuf>) -> &mut Self {
        self.junit_path = junit_path;
        self
    }

    /// Creates the orchestrator.
    ///
    /// Runs are written to `<store_dir>/runs/<run-id>`, and instrumentation is materialized
    /// into `<store_dir>/instrumentation`. Events are reported to `sink`.
    pub fn build<'a>(
        self,
        store_dir: impl Into<Utf8PathBuf>,
        sink: &'a dyn RoundEventSink,
    ) -> RoundOrchestrator<'a> {
        RoundOrchestrator {
            settings: self,
            store_dir: store_dir.into(),
            sink,
        }
    }
}

/// Runs the baseline and seeded rounds of a single flakehunt run.
pub struct RoundOrchestrator<'a> {
    settings: RoundOrchestratorBuilder,
    store_dir: Utf8PathBuf,
    sink: &'a dyn RoundEventSink,
}

impl RoundOrchestrator<'_> {
    /// Executes the run.
    ///
    /// Errors from the engine, the instrumentation provider, or creating the run directory end
    /// the run immediately. Failing to write the run log or report artifacts does not: those
    /// failures are reported to the event sink as warnings.
    pub fn run<E, I>(
        self,
        engine: &mut E,
        instrumentation: &mut I,
    ) -> Result<OrchestratorOutcome, OrchestratorError>
    where
        E: ExecutionEngine + ?Sized,
        I: InstrumentationProvider + ?Sized,
    {
        let settings = &self.settings;
        let started_at = Local::now().fixed_offset();
        let stopwatch = Instant::now();
        let run_dir = RunDir::new(&self.store_dir, ReportUuid::new_v4());
        let artifact_dir = artifact_dir(&self.store_dir);
        let mut state = StateTracker::new();
        let mut processor =
            ResultProcessor::new(settings.retry_filter.clone(), settings.max_failures);

        self.sink
            .report_event(RoundEvent::new(RoundEventKind::RunStarted {
                run_id: run_dir.run_id(),
                max_rounds: settings.max_rounds,
                base_seed: settings.base_seed,
            }));

        if settings.max_rounds == 0 {
            state.advance(OrchestratorState::Baseline);
            let config = RoundConfiguration::baseline(run_dir.path(), &artifact_dir);
            let (record, _) = self.execute_round(engine, config, &mut processor, false)?;
            state.advance(OrchestratorState::Done);
            return Ok(OrchestratorOutcome::Unperturbed(record));
        }

        run_dir.create()?;
        instrumentation.materialize(&artifact_dir)?;
        if !artifact_dir.is_dir() {
            return Err(InstrumentationError::ArtifactMissing { dir: artifact_dir }.into());
        }
        self.sink
            .report_event(RoundEvent::new(RoundEventKind::InstrumentationReady {
                artifact_dir: &artifact_dir,
            }));

        let mut generator =
            ReportGenerator::new(&run_dir, settings.junit_path.as_deref(), self.sink);

        state.advance(OrchestratorState::Baseline);
        let config = RoundConfiguration::baseline(run_dir.path(), &artifact_dir);
        let (baseline, _) = self.execute_round(engine, config, &mut processor, true)?;
        generator.round_completed(&baseline);

        let max_rounds = settings.max_rounds as usize;
        let mut rounds: Vec<RoundRecord> = Vec::with_capacity(max_rounds);
        processor.reset(max_rounds == 1);

        let status = loop {
            let index = rounds.len();
            state.advance(OrchestratorState::Seeded(index));
            let config = RoundConfiguration::seeded(
                index,
                seed_for_round(index, settings.base_seed),
                settings.perturbation.clone(),
                run_dir.path(),
                &artifact_dir,
            );
            let (record, result) = self.execute_round(engine, config, &mut processor, true)?;
            generator.round_completed(&record);
            rounds.push(record);

            if !result.non_retried_tests().is_empty() {
                let tests = result
                    .non_retry_reasons()
                    .iter()
                    .map(|(test, reason)| (test.clone(), *reason))
                    .collect();
                break RunStatus::Aborted(AbortReason::NonRetried(tests));
            }
            if settings.simulate_non_retryable {
                break RunStatus::Aborted(AbortReason::Simulated);
            }
            if result.last_round() {
                break RunStatus::Completed;
            }
            processor.reset(index + 2 == max_rounds);
        };

        match &status {
            RunStatus::Completed => state.advance(OrchestratorState::Done),
            RunStatus::Aborted(reason) => {
                state.advance(OrchestratorState::Aborted);
                self.sink
                    .report_event(RoundEvent::new(RoundEventKind::RunAborted { reason }));
            }
        }

        let baseline_failures = baseline.failed_tests().clone();
        for record in &mut rounds {
            let removed = record.subtract_baseline(&baseline_failures);
            if removed > 0 {
                debug!(
                    execution_id = %record.config().execution_id(),
                    removed,
                    "subtracted baseline failures",
                );
            }
        }

        let finished = FinishedRun {
            run_id: run_dir.run_id(),
            base_seed: settings.base_seed,
            max_rounds: settings.max_rounds,
            status: &status,
            baseline: &baseline,
            rounds: &rounds,
            started_at,
            elapsed: stopwatch.elapsed(),
        };
        let report = generator.finish(&finished);

        self.sink
            .report_event(RoundEvent::new(RoundEventKind::RunFinished {
                run_id: run_dir.run_id(),
                status: &status,
                rounds_run: rounds.len(),
                baseline_failures: report.baseline_failures(),
                aggregate_failures: report.aggregate_failures(),
            }));

        Ok(OrchestratorOutcome::Finished(FlakeRunOutcome {
            run_id: run_dir.run_id(),
            run_dir: run_dir.path().to_owned(),
            status,
            baseline,
            rounds,
            report,
        }))
    }

    fn execute_round<E>(
        &self,
        engine: &mut E,
        config: RoundConfiguration,
        processor: &mut ResultProcessor,
        create_output_dir: bool,
    ) -> Result<(RoundRecord, RoundResult), OrchestratorError>
    where
        E: ExecutionEngine + ?Sized,
    {
        if create_output_dir {
            let output_dir = config.output_dir();
            std::fs::create_dir_all(output_dir)
                .map_err(|error| RunDirCreateError::new(output_dir, error))?;
        }

        self.sink
            .report_event(RoundEvent::new(RoundEventKind::RoundStarted {
                config: &config,
                max_rounds: self.settings.max_rounds,
            }));

        let selection = TestSelection::new(&config, &self.settings.retry_filter);
        engine
            .execute(&selection, processor)
            .map_err(|error| OrchestratorError::Engine {
                execution_id: config.execution_id(),
                error,
            })?;

        let result = processor.result().clone();
        let record = config.complete(&result);
        self.sink
            .report_event(RoundEvent::new(RoundEventKind::RoundFinished {
                record: &record,
                result: &result,
            }));

        Ok((record, result))
    }
}
