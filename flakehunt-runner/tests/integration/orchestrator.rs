// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::{Result, bail, ensure};
use flakehunt_metadata::RunSummary;
use flakehunt_runner::{
    config::MaxFailures,
    errors::{EngineError, NonRetriedTestsError, OrchestratorError},
    orchestrator::{
        AbortReason, FlakeRunOutcome, OrchestratorOutcome, RoundOrchestratorBuilder, RunStatus,
    },
    report::{MatrixCell, RunLog},
    reporter::{DisplayReporter, TracingEventSink},
    result_processor::{FailureKind, NonRetryReason},
    retry_filter::RetryFilterSpec,
    run_dir::{REPORT_FILE_NAME, RUN_LOG_FILE_NAME, SUMMARY_FILE_NAME, runs_dir},
    seed::{DEFAULT_BASE_SEED, seed_for_round},
    test_id::{TestDescriptor, TestId},
};
use maplit::btreeset;
use pretty_assertions::assert_eq;

const TESTS: [&str; 3] = [
    "com.example.Ordered#first",
    "com.example.Ordered#second",
    "com.example.Hashed#iteration",
];

fn run(
    builder: &RoundOrchestratorBuilder,
    store_dir: &Utf8TempDir,
    engine: &mut ScriptedEngine,
) -> Result<FlakeRunOutcome> {
    let mut instrumentation = CountingInstrumentation::default();
    let outcome = builder
        .clone()
        .build(store_dir.path(), &TracingEventSink)
        .run(engine, &mut instrumentation)?;
    ensure!(instrumentation.calls == 1, "instrumentation runs once");
    match outcome {
        OrchestratorOutcome::Finished(outcome) => Ok(outcome),
        OrchestratorOutcome::Unperturbed(_) => bail!("expected seeded rounds to run"),
    }
}

#[test]
fn zero_rounds_is_a_single_unperturbed_execution() -> Result<()> {
    let store_dir = Utf8TempDir::new()?;
    let mut engine = ScriptedEngine::new(TESTS).fail(Round::Baseline, TESTS[0]);
    let mut instrumentation = CountingInstrumentation::default();

    let outcome = RoundOrchestratorBuilder::new(0)
        .build(store_dir.path(), &TracingEventSink)
        .run(&mut engine, &mut instrumentation)?;

    let OrchestratorOutcome::Unperturbed(record) = outcome else {
        bail!("expected an unperturbed outcome");
    };
    assert!(record.config().is_baseline());
    assert_eq!(record.failed_tests(), &btreeset! { test_id(TESTS[0]) });
    assert_eq!(engine.invocations.len(), 1);
    assert_eq!(instrumentation.calls, 0, "no instrumentation");
    assert!(
        !runs_dir(store_dir.path()).exists(),
        "no run directory, run log or report"
    );
    Ok(())
}

#[test]
fn failure_under_one_seed_is_reported() -> Result<()> {
    let store_dir = Utf8TempDir::new()?;
    let flaky = TESTS[2];
    let mut engine = ScriptedEngine::new(TESTS).fail(Round::Seeded(3), flaky);

    let outcome = run(&RoundOrchestratorBuilder::new(5), &store_dir, &mut engine)?;

    assert_eq!(outcome.status(), &RunStatus::Completed);
    assert_eq!(outcome.rounds().len(), 5);
    assert_eq!(
        engine.seeded_invocations(),
        (0..5)
            .map(|index| (index, seed_for_round(index, DEFAULT_BASE_SEED)))
            .collect::<Vec<_>>()
    );

    let report = outcome.report();
    let flaky = test_id(flaky);
    assert_eq!(report.aggregate_failures(), &btreeset! { flaky.clone() });
    let matrix = report.matrix();
    for (index, expected) in [
        MatrixCell::Pass,
        MatrixCell::Pass,
        MatrixCell::Pass,
        MatrixCell::Fail,
        MatrixCell::Pass,
    ]
    .into_iter()
    .enumerate()
    {
        assert_eq!(matrix.cell(&flaky, index), Some(expected), "seed {index}");
    }
    assert!(outcome.has_flaky_tests());
    outcome.check_non_retried()?;

    // Recovery after the failing seed is recorded.
    assert_eq!(outcome.rounds()[4].recovered_tests(), &btreeset! { flaky });

    // The run log lists every round in order, and the summary agrees with the outcome.
    let run_log = RunLog::read(&outcome.run_dir().join(RUN_LOG_FILE_NAME))?;
    let expected_ids: Vec<_> = std::iter::once(outcome.baseline())
        .chain(outcome.rounds())
        .map(|record| record.config().execution_id())
        .collect();
    assert_eq!(run_log, expected_ids);
    assert!(run_log[0].is_baseline());

    let summary = RunSummary::from_path(outcome.run_dir().join(SUMMARY_FILE_NAME))?;
    assert_eq!(summary.run_id, outcome.run_id().to_string());
    assert!(summary.has_flaky_tests());
    Ok(())
}

#[test]
fn baseline_failures_are_subtracted() -> Result<()> {
    let store_dir = Utf8TempDir::new()?;
    let broken = TESTS[0];
    let mut engine = ScriptedEngine::new(TESTS).fail(Round::Baseline, broken);
    for index in 0..3 {
        engine = engine.fail(Round::Seeded(index), broken);
    }

    let outcome = run(&RoundOrchestratorBuilder::new(3), &store_dir, &mut engine)?;

    let broken = test_id(broken);
    assert_eq!(outcome.baseline().failed_tests(), &btreeset! { broken.clone() });
    for record in outcome.rounds() {
        assert!(record.failed_tests().is_empty(), "subtracted from every round");
    }
    let report = outcome.report();
    assert_eq!(report.baseline_failures(), &btreeset! { broken.clone() });
    assert!(report.aggregate_failures().is_empty());
    assert!(report.matrix().rows().all(|(test, _)| *test != broken));
    assert!(!outcome.has_flaky_tests());
    assert!(report.markdown().contains("- `com.example.Ordered#first`"));
    Ok(())
}

#[test]
fn non_retryable_failure_stops_the_loop() -> Result<()> {
    let store_dir = Utf8TempDir::new()?;
    let crashed = TESTS[1];
    let mut engine = ScriptedEngine::new(TESTS).fail_with(
        Round::Seeded(1),
        crashed,
        FailureKind::InfrastructureError,
    );

    let outcome = run(&RoundOrchestratorBuilder::new(5), &store_dir, &mut engine)?;

    // Round 2 of 5 aborts, so rounds 3 to 5 never execute.
    assert_eq!(engine.invocations.len(), 3);
    assert_eq!(outcome.rounds().len(), 2);
    let crashed = test_id(crashed);
    assert_eq!(
        outcome.status(),
        &RunStatus::Aborted(AbortReason::NonRetried(vec![(
            crashed.clone(),
            NonRetryReason::NonRetryableCause(FailureKind::InfrastructureError),
        )]))
    );

    let error = outcome
        .check_non_retried()
        .expect_err("non-retried tests are an error");
    let message = error.to_string();
    assert!(
        message.contains("could not determine flakiness for 1 test"),
        "{message}"
    );
    assert!(message.contains(&crashed.to_string()), "{message}");

    // Rounds that ran are still reported.
    assert_eq!(
        outcome.report().aggregate_failures(),
        &btreeset! { crashed.clone() }
    );
    assert_eq!(outcome.report().matrix().columns().len(), 2);
    Ok(())
}

#[test]
fn failure_cap_stops_the_loop() -> Result<()> {
    let store_dir = Utf8TempDir::new()?;
    let flaky = TESTS[0];
    let mut engine = ScriptedEngine::new(TESTS)
        .fail(Round::Seeded(0), flaky)
        .fail(Round::Seeded(2), flaky);
    let mut builder = RoundOrchestratorBuilder::new(5);
    builder.set_max_failures(MaxFailures::Count(1));

    let outcome = run(&builder, &store_dir, &mut engine)?;

    assert_eq!(outcome.rounds().len(), 3);
    assert_eq!(
        outcome.status(),
        &RunStatus::Aborted(AbortReason::NonRetried(vec![(
            test_id(flaky),
            NonRetryReason::MaxFailuresExceeded {
                failures: 2,
                max: 1
            },
        )]))
    );
    Ok(())
}

#[test]
fn unselected_failure_is_not_retried() -> Result<()> {
    let store_dir = Utf8TempDir::new()?;
    let slow = "com.example.slow.Integration#end_to_end";
    let mut engine = ScriptedEngine::new(TESTS)
        .with_test(TestDescriptor::new(test_id(slow)))
        .fail(Round::Seeded(0), slow)
        .ignore_selection();
    let mut builder = RoundOrchestratorBuilder::new(3);
    builder.set_retry_filter(
        RetryFilterSpec {
            exclude_classes: vec!["com.example.slow.*".to_owned()],
            ..Default::default()
        }
        .build()?,
    );

    let outcome = run(&builder, &store_dir, &mut engine)?;

    assert_eq!(outcome.rounds().len(), 1);
    match outcome.check_non_retried() {
        Err(NonRetriedTestsError::NonRetried { tests }) => {
            assert_eq!(tests, vec![(test_id(slow), NonRetryReason::NotSelected)]);
        }
        other => bail!("unexpected result: {other:?}"),
    }
    Ok(())
}

#[test]
fn retry_filter_limits_seeded_rounds() -> Result<()> {
    let store_dir = Utf8TempDir::new()?;
    let mut engine = ScriptedEngine::new(TESTS).with_test(TestDescriptor::with_annotations(
        TestId::new("com.example.Tagged", "slow"),
        ["org.example.Slow"],
    ));
    let mut builder = RoundOrchestratorBuilder::new(2);
    builder.set_retry_filter(
        RetryFilterSpec {
            exclude_annotations: vec!["*.Slow".to_owned()],
            ..Default::default()
        }
        .build()?,
    );

    let outcome = run(&builder, &store_dir, &mut engine)?;

    let tagged = TestId::new("com.example.Tagged", "slow");
    assert!(outcome.baseline().passed_tests().contains(&tagged));
    for record in outcome.rounds() {
        assert!(!record.passed_tests().contains(&tagged));
        assert_eq!(record.passed_tests().len(), TESTS.len());
    }
    Ok(())
}

#[test]
fn simulate_non_retryable_stops_after_first_round() -> Result<()> {
    let store_dir = Utf8TempDir::new()?;
    let mut engine = ScriptedEngine::new(TESTS);
    let mut builder = RoundOrchestratorBuilder::new(5);
    builder.set_simulate_non_retryable(true);

    let outcome = run(&builder, &store_dir, &mut engine)?;

    assert_eq!(outcome.rounds().len(), 1);
    assert_eq!(
        outcome.status(),
        &RunStatus::Aborted(AbortReason::Simulated)
    );
    assert!(matches!(
        outcome.check_non_retried(),
        Err(NonRetriedTestsError::Simulated)
    ));
    Ok(())
}

#[test]
fn single_round_is_last() -> Result<()> {
    let store_dir = Utf8TempDir::new()?;
    let mut engine = ScriptedEngine::new(TESTS);

    let outcome = run(&RoundOrchestratorBuilder::new(1), &store_dir, &mut engine)?;

    assert_eq!(outcome.status(), &RunStatus::Completed);
    assert_eq!(engine.invocations.len(), 2);
    assert!(outcome.report().matrix().is_empty());
    assert!(
        outcome
            .report()
            .markdown()
            .contains("No tests failed only under perturbation.")
    );
    Ok(())
}

#[test]
fn engine_errors_propagate() -> Result<()> {
    let store_dir = Utf8TempDir::new()?;
    let mut engine = ScriptedEngine::new(TESTS).error_at(Round::Seeded(2));
    let mut instrumentation = CountingInstrumentation::default();

    let error = RoundOrchestratorBuilder::new(5)
        .build(store_dir.path(), &TracingEventSink)
        .run(&mut engine, &mut instrumentation)
        .expect_err("engine error is fatal");

    match error {
        OrchestratorError::Engine { execution_id, error } => {
            assert!(!execution_id.is_baseline());
            assert!(matches!(error, EngineError::Aborted { .. }), "{error}");
        }
        other => bail!("unexpected error: {other}"),
    }
    assert_eq!(engine.invocations.len(), 4, "no rounds after the error");
    Ok(())
}

#[test]
fn instrumentation_failure_is_fatal() -> Result<()> {
    let store_dir = Utf8TempDir::new()?;
    let mut engine = ScriptedEngine::new(TESTS);
    let mut instrumentation = CountingInstrumentation {
        fail: true,
        ..Default::default()
    };

    let error = RoundOrchestratorBuilder::new(5)
        .build(store_dir.path(), &TracingEventSink)
        .run(&mut engine, &mut instrumentation)
        .expect_err("instrumentation error is fatal");

    assert!(
        matches!(error, OrchestratorError::Instrumentation(_)),
        "{error}"
    );
    assert!(engine.invocations.is_empty(), "no rounds executed");
    Ok(())
}

#[test]
fn display_reporter_summarizes_run() -> Result<()> {
    let store_dir = Utf8TempDir::new()?;
    let mut engine = ScriptedEngine::new(TESTS).fail(Round::Seeded(1), TESTS[1]);
    let mut instrumentation = CountingInstrumentation::default();
    let reporter = DisplayReporter::new(Vec::new());

    RoundOrchestratorBuilder::new(2)
        .build(store_dir.path(), &reporter)
        .run(&mut engine, &mut instrumentation)?;

    let output = String::from_utf8(reporter.finish()?)?;
    let finished = output
        .lines()
        .filter(|line| line.trim_start().starts_with("Finished"))
        .count();
    assert_eq!(finished, 3, "baseline and two seeds:\n{output}");
    assert!(
        output.contains("2 seeded rounds run, 0 baseline failures, 1 flaky test"),
        "{output}"
    );
    assert!(
        output.contains("FLAKY com.example.Ordered#second"),
        "{output}"
    );
    Ok(())
}

#[test]
fn artifact_write_failures_do_not_stop_the_run() -> Result<()> {
    let store_dir = Utf8TempDir::new()?;
    let flaky = TESTS[1];
    let mut engine = ScriptedEngine::new(TESTS).fail(Round::Seeded(2), flaky);
    let mut instrumentation = ArtifactBlockingInstrumentation {
        runs_dir: runs_dir(store_dir.path()),
    };
    // The JUnit path's parent is a file, so its directory cannot be created.
    let not_a_dir = store_dir.path().join("not-a-dir");
    std::fs::write(&not_a_dir, "")?;
    let mut builder = RoundOrchestratorBuilder::new(3);
    builder.set_junit_path(Some(not_a_dir.join("junit.xml")));
    let reporter = DisplayReporter::new(Vec::new());

    let outcome = builder
        .build(store_dir.path(), &reporter)
        .run(&mut engine, &mut instrumentation)?;

    let OrchestratorOutcome::Finished(outcome) = outcome else {
        bail!("expected seeded rounds to run");
    };
    assert_eq!(engine.invocations.len(), 4, "baseline and every seed executed");
    assert_eq!(outcome.status(), &RunStatus::Completed);
    assert_eq!(
        outcome.report().aggregate_failures(),
        &btreeset! { test_id(flaky) }
    );
    for name in [RUN_LOG_FILE_NAME, REPORT_FILE_NAME, SUMMARY_FILE_NAME] {
        assert!(outcome.run_dir().join(name).is_dir(), "{name} was not written");
    }

    let output = String::from_utf8(reporter.finish()?)?;
    let warnings: Vec<_> = output
        .lines()
        .filter(|line| line.trim_start().starts_with("Warning"))
        .collect();
    assert_eq!(warnings.len(), 4, "run log, report, summary and JUnit:\n{output}");
    for name in [RUN_LOG_FILE_NAME, REPORT_FILE_NAME, SUMMARY_FILE_NAME, "junit.xml"] {
        assert!(
            warnings.iter().any(|line| line.contains(name)),
            "no warning for {name}:\n{output}"
        );
    }
    assert!(
        output.contains("FLAKY com.example.Ordered#second"),
        "{output}"
    );
    Ok(())
}
