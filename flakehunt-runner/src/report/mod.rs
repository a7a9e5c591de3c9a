// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reports over the rounds of a run.
//!
//! A [`ReportGenerator`] appends each finished round to the run log while the run is in
//! progress. Once the round loop stops, it computes the aggregate failure set and the
//! [`FlakeMatrix`], and writes the report artifacts into the run directory.
//!
//! Failing to write any artifact is reported to the event sink as a warning. The in-memory
//! [`FlakeReport`] is always complete.

mod junit;
mod matrix;
mod render;
mod run_log;
mod summary;

pub use matrix::*;
pub use run_log::*;

use crate::{
    orchestrator::RunStatus,
    reporter::{ArtifactKind, RoundEvent, RoundEventKind, RoundEventSink},
    round::RoundRecord,
    run_dir::RunDir,
    test_id::TestId,
};
use camino::Utf8Path;
use chrono::{DateTime, FixedOffset};
use quick_junit::ReportUuid;
use std::{collections::BTreeSet, error, time::Duration};

/// Everything known about a run once its round loop has stopped.
#[derive(Clone, Debug)]
pub struct FinishedRun<'a> {
    /// The UUID for this run.
    pub run_id: ReportUuid,

    /// The base seed per-round seeds were derived from.
    pub base_seed: u64,

    /// The maximum number of seeded rounds.
    pub max_rounds: u32,

    /// How the round loop ended.
    pub status: &'a RunStatus,

    /// The baseline round.
    pub baseline: &'a RoundRecord,

    /// The seeded rounds that executed, with baseline failures already subtracted.
    pub rounds: &'a [RoundRecord],

    /// When the run started.
    pub started_at: DateTime<FixedOffset>,

    /// How long the run took.
    pub elapsed: Duration,
}

/// Returns the union of every seeded round's failures.
///
/// Baseline rounds in `rounds` are skipped. Rounds are expected to have had baseline failures
/// subtracted already, so the result excludes them.
pub fn aggregate_failures<'a>(
    rounds: impl IntoIterator<Item = &'a RoundRecord>,
) -> BTreeSet<TestId> {
    rounds
        .into_iter()
        .filter(|record| !record.config().is_baseline())
        .flat_map(|record| record.failed_tests().iter().cloned())
        .collect()
}

/// The result of reporting on a run.
#[derive(Clone, Debug)]
pub struct FlakeReport {
    baseline_failures: BTreeSet<TestId>,
    aggregate_failures: BTreeSet<TestId>,
    matrix: FlakeMatrix,
    markdown: String,
}

impl FlakeReport {
    /// Builds the report for `run` without writing anything.
    pub fn new(run: &FinishedRun<'_>) -> Self {
        let aggregate_failures = aggregate_failures(run.rounds);
        let matrix = FlakeMatrix::new(run.rounds, &aggregate_failures);
        let markdown = render::render_markdown(run, &aggregate_failures, &matrix);
        Self {
            baseline_failures: run.baseline.failed_tests().clone(),
            aggregate_failures,
            matrix,
            markdown,
        }
    }

    /// Returns the tests that failed without perturbation.
    pub fn baseline_failures(&self) -> &BTreeSet<TestId> {
        &self.baseline_failures
    }

    /// Returns the tests that failed in at least one seeded round but not in the baseline.
    pub fn aggregate_failures(&self) -> &BTreeSet<TestId> {
        &self.aggregate_failures
    }

    /// Returns the test x seed matrix.
    pub fn matrix(&self) -> &FlakeMatrix {
        &self.matrix
    }

    /// Returns the rendered Markdown report.
    pub fn markdown(&self) -> &str {
        &self.markdown
    }
}

/// Writes the run log and report artifacts for a run.
pub struct ReportGenerator<'a> {
    run_dir: &'a RunDir,
    junit_path: Option<&'a Utf8Path>,
    run_log: Option<RunLog>,
    sink: &'a dyn RoundEventSink,
}

impl<'a> ReportGenerator<'a> {
    /// Creates a new generator, creating the run log inside `run_dir`.
    ///
    /// If the run log can't be created, a warning is reported and the run continues without
    /// one.
    pub fn new(
        run_dir: &'a RunDir,
        junit_path: Option<&'a Utf8Path>,
        sink: &'a dyn RoundEventSink,
    ) -> Self {
        let path = run_dir.run_log_path();
        let run_log = match RunLog::create(&path) {
            Ok(run_log) => Some(run_log),
            Err(error) => {
                report_failure(sink, ArtifactKind::RunLog, &path, &error);
                None
            }
        };

        Self {
            run_dir,
            junit_path,
            run_log,
            sink,
        }
    }

    /// Records that `record` finished, appending its execution id to the run log.
    pub fn round_completed(&mut self, record: &RoundRecord) {
        let Some(run_log) = &mut self.run_log else {
            return;
        };
        if let Err(error) = run_log.append(record.config().execution_id()) {
            report_failure(self.sink, ArtifactKind::RunLog, run_log.path(), &error);
        }
    }

    /// Builds the report for `run`, writing the Markdown report, the JSON summary, and, if
    /// configured, the JUnit report.
    pub fn finish(self, run: &FinishedRun<'_>) -> FlakeReport {
        let report = FlakeReport::new(run);

        let report_path = self.run_dir.report_path();
        self.write_artifact(ArtifactKind::Report, &report_path, |path| {
            std::fs::write(path, report.markdown())
        });

        let summary = summary::build_summary(run, report.aggregate_failures());
        let summary_path = self.run_dir.summary_path();
        self.write_artifact(ArtifactKind::Summary, &summary_path, |path| {
            summary::write_summary(path, &summary)
        });

        if let Some(junit_path) = self.junit_path {
            let junit = junit::build_junit(run);
            self.write_artifact(ArtifactKind::Junit, junit_path, |path| {
                junit::write_junit(path, &junit)
            });
        }

        report
    }

    fn write_artifact<E>(
        &self,
        kind: ArtifactKind,
        path: &Utf8Path,
        write: impl FnOnce(&Utf8Path) -> Result<(), E>,
    ) where
        E: error::Error + 'static,
    {
        match write(path) {
            Ok(()) => self
                .sink
                .report_event(RoundEvent::new(RoundEventKind::ArtifactWritten { kind, path })),
            Err(error) => report_failure(self.sink, kind, path, &error),
        }
    }
}

fn report_failure(
    sink: &dyn RoundEventSink,
    kind: ArtifactKind,
    path: &Utf8Path,
    error: &(dyn error::Error + 'static),
) {
    sink.report_event(RoundEvent::new(RoundEventKind::ArtifactWriteFailed {
        kind,
        path,
        error,
    }));
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use super::*;
    use crate::{
        config::MaxFailures,
        result_processor::{FailureCause, FailureKind, ResultProcessor},
        retry_filter::RetryFilter,
        round::{PerturbationSettings, RoundConfiguration},
        seed::DEFAULT_BASE_SEED,
        test_id::TestDescriptor,
    };

    /// Builds [`RoundRecord`]s by feeding outcomes through a [`ResultProcessor`].
    pub(crate) struct RecordBuilder {
        config: RoundConfiguration,
        failed: Vec<TestId>,
        passed: Vec<TestId>,
    }

    impl RecordBuilder {
        pub(crate) fn baseline() -> Self {
            Self::new(RoundConfiguration::baseline(
                Utf8Path::new("run"),
                Utf8Path::new("artifacts"),
            ))
        }

        pub(crate) fn seeded(index: usize, seed: u64) -> Self {
            Self::new(RoundConfiguration::seeded(
                index,
                seed,
                PerturbationSettings::default(),
                Utf8Path::new("run"),
                Utf8Path::new("artifacts"),
            ))
        }

        fn new(config: RoundConfiguration) -> Self {
            Self {
                config,
                failed: Vec::new(),
                passed: Vec::new(),
            }
        }

        pub(crate) fn failed(mut self, test: &TestId) -> Self {
            self.failed.push(test.clone());
            self
        }

        pub(crate) fn passed(mut self, test: &TestId) -> Self {
            self.passed.push(test.clone());
            self
        }

        pub(crate) fn build(self) -> RoundRecord {
            let mut processor = ResultProcessor::new(RetryFilter::all(), MaxFailures::Unlimited);
            if !self.config.is_baseline() {
                processor.reset(false);
            }
            for test in self.failed {
                processor.on_test_failed(
                    &TestDescriptor::new(test),
                    &FailureCause::new(FailureKind::Assertion),
                );
            }
            for test in self.passed {
                processor.on_test_passed(&TestDescriptor::new(test));
            }
            self.config.complete(processor.result())
        }
    }

    impl<'a> FinishedRun<'a> {
        pub(crate) fn for_test(
            run_id: ReportUuid,
            max_rounds: u32,
            status: &'a RunStatus,
            baseline: &'a RoundRecord,
            rounds: &'a [RoundRecord],
        ) -> Self {
            Self {
                run_id,
                base_seed: DEFAULT_BASE_SEED,
                max_rounds,
                status,
                baseline,
                rounds,
                started_at: chrono::Local::now().fixed_offset(),
                elapsed: Duration::from_secs(1),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{test_helpers::RecordBuilder, *};
    use crate::reporter::DisplayReporter;
    use camino_tempfile::Utf8TempDir;
    use pretty_assertions::assert_eq;

    #[test]
    fn aggregate_skips_baseline() {
        let broken = TestId::new("com.example.A", "broken");
        let flaky = TestId::new("com.example.A", "flaky");
        let records = [
            RecordBuilder::baseline().failed(&broken).build(),
            RecordBuilder::seeded(0, 1).failed(&flaky).build(),
            RecordBuilder::seeded(1, 2).failed(&flaky).build(),
        ];
        assert_eq!(aggregate_failures(&records), BTreeSet::from([flaky]));
    }

    #[test]
    fn finish_writes_artifacts() {
        let temp_dir = Utf8TempDir::new().unwrap();
        let run_dir = RunDir::new(temp_dir.path(), ReportUuid::new_v4());
        run_dir.create().unwrap();
        let junit_path = temp_dir.path().join("junit/flakehunt.xml");
        let sink = DisplayReporter::new(Vec::new()).verbose(true);

        let flaky = TestId::new("com.example.A", "flaky");
        let baseline = RecordBuilder::baseline().passed(&flaky).build();
        let rounds = vec![RecordBuilder::seeded(0, 1).failed(&flaky).build()];

        let mut generator = ReportGenerator::new(&run_dir, Some(&junit_path), &sink);
        generator.round_completed(&baseline);
        generator.round_completed(&rounds[0]);
        let status = RunStatus::Completed;
        let run = FinishedRun::for_test(run_dir.run_id(), 1, &status, &baseline, &rounds);
        let report = generator.finish(&run);

        assert_eq!(report.aggregate_failures(), &BTreeSet::from([flaky]));
        assert_eq!(
            RunLog::read(&run_dir.run_log_path()).unwrap(),
            vec![
                baseline.config().execution_id(),
                rounds[0].config().execution_id()
            ]
        );
        assert_eq!(
            std::fs::read_to_string(run_dir.report_path()).unwrap(),
            report.markdown()
        );
        assert!(run_dir.summary_path().is_file());
        assert!(junit_path.is_file());

        let output = String::from_utf8(sink.finish().unwrap()).unwrap();
        assert!(!output.contains("Warning"), "output: {output}");
        assert_eq!(output.matches("Wrote").count(), 3, "output: {output}");
    }

    #[test]
    fn write_failures_are_warnings() {
        let temp_dir = Utf8TempDir::new().unwrap();
        // The run directory is never created, so nothing can be written.
        let run_dir = RunDir::new(temp_dir.path(), ReportUuid::new_v4());
        let sink = DisplayReporter::new(Vec::new());

        let flaky = TestId::new("com.example.A", "flaky");
        let baseline = RecordBuilder::baseline().build();
        let rounds = vec![RecordBuilder::seeded(0, 1).failed(&flaky).build()];

        let mut generator = ReportGenerator::new(&run_dir, None, &sink);
        generator.round_completed(&rounds[0]);
        let status = RunStatus::Completed;
        let run = FinishedRun::for_test(run_dir.run_id(), 1, &status, &baseline, &rounds);
        let report = generator.finish(&run);

        assert_eq!(report.aggregate_failures(), &BTreeSet::from([flaky]));
        let output = String::from_utf8(sink.finish().unwrap()).unwrap();
        assert!(output.contains("could not write run log"), "output: {output}");
        assert!(output.contains("could not write report"), "output: {output}");
        assert!(output.contains("could not write summary"), "output: {output}");
    }
}
