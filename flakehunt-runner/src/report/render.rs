// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{FinishedRun, FlakeMatrix};
use crate::{
    helpers::plural,
    orchestrator::{AbortReason, RunStatus},
    round::RoundRecord,
    test_id::TestId,
};
use std::collections::BTreeSet;
use swrite::{SWrite, swrite, swriteln};

/// Renders the Markdown report for a finished run.
pub(super) fn render_markdown(
    run: &FinishedRun<'_>,
    aggregate_failures: &BTreeSet<TestId>,
    matrix: &FlakeMatrix,
) -> String {
    let mut out = String::new();
    swriteln!(out, "# Flakehunt report");
    swriteln!(out);
    swriteln!(
        out,
        "Run `{}` executed {} of {} seeded {} with base seed {}.",
        run.run_id,
        run.rounds.len(),
        run.max_rounds,
        plural::rounds_str(run.max_rounds as usize),
        run.base_seed,
    );

    if let RunStatus::Aborted(reason) = run.status {
        swriteln!(out);
        write_abort_reason(&mut out, reason);
    }

    swriteln!(out);
    swriteln!(out, "## Baseline failures");
    swriteln!(out);
    let baseline_failures = run.baseline.failed_tests();
    if baseline_failures.is_empty() {
        swriteln!(out, "No tests failed without perturbation.");
    } else {
        swriteln!(
            out,
            "{} {} failed without perturbation, and {} excluded from the matrix below:",
            baseline_failures.len(),
            plural::tests_str(baseline_failures.len()),
            plural::is_str(baseline_failures.len()),
        );
        swriteln!(out);
        for test in baseline_failures {
            swriteln!(out, "- `{test}`");
        }
    }

    swriteln!(out);
    swriteln!(out, "## Flaky tests");
    swriteln!(out);
    if aggregate_failures.is_empty() {
        swriteln!(out, "No tests failed only under perturbation.");
    } else {
        swriteln!(
            out,
            "{} {} failed under at least one seed:",
            aggregate_failures.len(),
            plural::tests_str(aggregate_failures.len()),
        );
    }
    swriteln!(out);
    write_matrix(&mut out, matrix);

    swriteln!(out);
    swriteln!(out, "## Rounds");
    swriteln!(out);
    swriteln!(out, "| Round | Seed | Execution id | Passed | Failed |");
    swriteln!(out, "| --- | --- | --- | --- | --- |");
    write_round_row(&mut out, run.baseline);
    for record in run.rounds {
        write_round_row(&mut out, record);
    }

    out
}

fn write_abort_reason(out: &mut String, reason: &AbortReason) {
    match reason {
        AbortReason::NonRetried(tests) => {
            swriteln!(
                out,
                "The run stopped early: could not determine flakiness for {} {}.",
                tests.len(),
                plural::tests_str(tests.len()),
            );
            swriteln!(out);
            for (test, reason) in tests {
                swriteln!(out, "- `{test}`: {reason}");
            }
        }
        AbortReason::Simulated => {
            swriteln!(
                out,
                "The run stopped early because `simulate-non-retryable` is set."
            );
        }
    }
}

fn write_matrix(out: &mut String, matrix: &FlakeMatrix) {
    swrite!(out, "| Test |");
    for column in matrix.columns() {
        swrite!(out, " seed {} (`{}`) |", column.index, column.seed);
    }
    swriteln!(out);

    swrite!(out, "| --- |");
    for _ in matrix.columns() {
        swrite!(out, " --- |");
    }
    swriteln!(out);

    for (test, cells) in matrix.rows() {
        swrite!(out, "| `{test}` |");
        for cell in cells {
            swrite!(out, " {} |", cell.as_str());
        }
        swriteln!(out);
    }
}

fn write_round_row(out: &mut String, record: &RoundRecord) {
    let config = record.config();
    let (round, seed) = match (config.mode().index(), config.mode().seed()) {
        (Some(index), Some(seed)) => (index.to_string(), seed.to_string()),
        _ => ("baseline".to_owned(), "-".to_owned()),
    };
    swriteln!(
        out,
        "| {round} | {seed} | `{}` | {} | {} |",
        config.execution_id(),
        record.passed_tests().len(),
        record.failed_tests().len() + record.also_failed_in_baseline().len(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::test_helpers::RecordBuilder;
    use indoc::formatdoc;
    use pretty_assertions::assert_eq;
    use quick_junit::ReportUuid;

    #[test]
    fn render_with_flaky_test() {
        let broken = TestId::new("com.example.Broken", "always");
        let flaky = TestId::new("com.example.Ordered", "depends_on_order");
        let stable = TestId::new("com.example.Ordered", "stable");

        let baseline = RecordBuilder::baseline()
            .failed(&broken)
            .passed(&flaky)
            .passed(&stable)
            .build();
        let mut rounds = vec![
            RecordBuilder::seeded(0, 11)
                .passed(&broken)
                .passed(&flaky)
                .passed(&stable)
                .build(),
            RecordBuilder::seeded(1, 22)
                .failed(&broken)
                .failed(&flaky)
                .passed(&stable)
                .build(),
        ];
        for round in &mut rounds {
            round.subtract_baseline(baseline.failed_tests());
        }
        let aggregate = BTreeSet::from([flaky.clone()]);
        let matrix = FlakeMatrix::new(&rounds, &aggregate);
        let run_id = ReportUuid::new_v4();
        let run = FinishedRun::for_test(run_id, 2, &RunStatus::Completed, &baseline, &rounds);

        let expected = formatdoc! {"
            # Flakehunt report

            Run `{}` executed 2 of 2 seeded rounds with base seed 933178.

            ## Baseline failures

            1 test failed without perturbation, and is excluded from the matrix below:

            - `com.example.Broken#always`

            ## Flaky tests

            1 test failed under at least one seed:

            | Test | seed 0 (`11`) | seed 1 (`22`) |
            | --- | --- | --- |
            | `com.example.Ordered#depends_on_order` | pass | FAIL |

            ## Rounds

            | Round | Seed | Execution id | Passed | Failed |
            | --- | --- | --- | --- | --- |
            | baseline | - | `{}` | 2 | 1 |
            | 0 | 11 | `{}` | 3 | 0 |
            | 1 | 22 | `{}` | 1 | 2 |
            ",
            run_id,
            baseline.config().execution_id(),
            rounds[0].config().execution_id(),
            rounds[1].config().execution_id(),
        };
        assert_eq!(render_markdown(&run, &aggregate, &matrix), expected);
    }

    #[test]
    fn render_no_failures_is_header_only() {
        let test = TestId::new("com.example.A", "fine");
        let baseline = RecordBuilder::baseline().passed(&test).build();
        let rounds = vec![RecordBuilder::seeded(0, 5).passed(&test).build()];
        let aggregate = BTreeSet::new();
        let matrix = FlakeMatrix::new(&rounds, &aggregate);
        let status = RunStatus::Aborted(AbortReason::Simulated);
        let run = FinishedRun::for_test(ReportUuid::new_v4(), 3, &status, &baseline, &rounds);

        let rendered = render_markdown(&run, &aggregate, &matrix);
        assert!(rendered.contains("No tests failed without perturbation."));
        assert!(rendered.contains(
            "No tests failed only under perturbation.\n\n\
             | Test | seed 0 (`5`) |\n\
             | --- | --- |\n\n## Rounds"
        ));
        assert!(rendered.contains("because `simulate-non-retryable` is set"));
        assert!(rendered.contains("executed 1 of 3 seeded rounds"));
    }
}
