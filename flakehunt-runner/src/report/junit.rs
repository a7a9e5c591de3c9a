// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::FinishedRun;
use crate::{errors::ArtifactWriteError, round::RoundRecord};
use camino::Utf8Path;
use quick_junit::{NonSuccessKind, Report, TestCase, TestCaseStatus, TestSuite};
use std::fs::File;

pub(super) fn build_junit(run: &FinishedRun<'_>) -> Report {
    let mut report = Report::new("flakehunt-run");
    report
        .set_report_uuid(run.run_id)
        .set_timestamp(run.started_at)
        .set_time(run.elapsed)
        .add_test_suites(
            std::iter::once(run.baseline)
                .chain(run.rounds)
                .map(round_suite),
        );
    report
}

pub(super) fn write_junit(path: &Utf8Path, report: &Report) -> Result<(), ArtifactWriteError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|error| ArtifactWriteError::Fs {
            path: dir.to_owned(),
            error,
        })?;
    }
    let f = File::create(path).map_err(|error| ArtifactWriteError::Fs {
        path: path.to_owned(),
        error,
    })?;
    report
        .serialize(f)
        .map_err(|error| ArtifactWriteError::Junit {
            path: path.to_owned(),
            error,
        })
}

fn round_suite(record: &RoundRecord) -> TestSuite {
    let config = record.config();
    let mut suite = TestSuite::new(config.to_string());
    suite.add_property((
        "execution-id".to_owned(),
        config.execution_id().to_string(),
    ));
    if let Some(seed) = config.mode().seed() {
        suite.add_property(("seed".to_owned(), seed.to_string()));
    }

    // Failures take precedence: a test that both failed and passed in a round is in the
    // failed set only.
    let failed = record.failed_tests().iter().map(|test| {
        let mut status = TestCaseStatus::non_success(NonSuccessKind::Failure);
        if record.config().is_baseline() {
            status.set_message("failed without perturbation");
        }
        (test, status)
    });
    let also_failed = record.also_failed_in_baseline().iter().map(|test| {
        let mut status = TestCaseStatus::non_success(NonSuccessKind::Failure);
        status.set_message("also failed without perturbation");
        (test, status)
    });
    let passed = record
        .passed_tests()
        .iter()
        .map(|test| (test, TestCaseStatus::success()));

    let mut cases: Vec<_> = failed.chain(also_failed).chain(passed).collect();
    cases.sort_by(|(a, _), (b, _)| a.cmp(b));
    for (test, status) in cases {
        let mut case = TestCase::new(test.method_name(), status);
        case.set_classname(test.class_name());
        suite.add_test_case(case);
    }
    suite
}
