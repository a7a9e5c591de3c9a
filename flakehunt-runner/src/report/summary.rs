// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::FinishedRun;
use crate::{
    errors::ArtifactWriteError,
    orchestrator::{AbortReason, RunStatus},
    round::RoundRecord,
    test_id::TestId,
};
use camino::Utf8Path;
use flakehunt_metadata::{RoundSummary, RunStatusSummary, RunSummary};
use smol_str::{SmolStr, ToSmolStr};
use std::{
    collections::BTreeSet,
    fs::File,
    io::{BufWriter, Write},
};

pub(super) fn build_summary(
    run: &FinishedRun<'_>,
    aggregate_failures: &BTreeSet<TestId>,
) -> RunSummary {
    let (status, non_retried) = match run.status {
        RunStatus::Completed => (RunStatusSummary::Completed, BTreeSet::new()),
        RunStatus::Aborted(AbortReason::NonRetried(tests)) => (
            RunStatusSummary::Aborted { simulated: false },
            tests.iter().map(|(test, _)| test.to_smolstr()).collect(),
        ),
        RunStatus::Aborted(AbortReason::Simulated) => (
            RunStatusSummary::Aborted { simulated: true },
            BTreeSet::new(),
        ),
    };

    RunSummary::new(
        run.run_id.to_string(),
        run.base_seed,
        run.max_rounds,
        status,
        round_summary(run.baseline),
        run.rounds.iter().map(round_summary).collect(),
        test_names(run.baseline.failed_tests()),
        test_names(aggregate_failures),
        non_retried,
    )
}

pub(super) fn write_summary(
    path: &Utf8Path,
    summary: &RunSummary,
) -> Result<(), ArtifactWriteError> {
    let fs_error = |error| ArtifactWriteError::Fs {
        path: path.to_owned(),
        error,
    };
    let mut writer = BufWriter::new(File::create(path).map_err(fs_error)?);
    serde_json::to_writer_pretty(&mut writer, summary).map_err(|error| {
        ArtifactWriteError::Json {
            path: path.to_owned(),
            error,
        }
    })?;
    writer.flush().map_err(fs_error)
}

fn round_summary(record: &RoundRecord) -> RoundSummary {
    let mode = record.config().mode();
    RoundSummary::new(
        record.config().execution_id().to_string(),
        mode.index(),
        mode.seed(),
        test_names(record.failed_tests()),
        record.passed_tests().len(),
    )
}

fn test_names(tests: &BTreeSet<TestId>) -> BTreeSet<SmolStr> {
    tests.iter().map(|test| test.to_smolstr()).collect()
}
