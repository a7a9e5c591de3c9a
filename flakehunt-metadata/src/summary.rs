// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::SummaryReadError;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{collections::BTreeSet, path::Path};

/// Root element of a flakehunt `summary.json`.
///
/// Tests are identified by strings of the form `class#method`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct RunSummary {
    /// The unique identifier of this run.
    pub run_id: String,

    /// The base seed that per-round seeds were derived from.
    pub base_seed: u64,

    /// The maximum number of seeded rounds that were allowed.
    pub max_rounds: u32,

    /// How the round loop ended.
    pub status: RunStatusSummary,

    /// The unperturbed baseline round.
    pub baseline: RoundSummary,

    /// The seeded rounds that executed, in order.
    pub rounds: Vec<RoundSummary>,

    /// Tests that failed without any perturbation.
    pub baseline_failures: BTreeSet<SmolStr>,

    /// Tests that failed in at least one seeded round but not in the baseline.
    pub aggregate_failures: BTreeSet<SmolStr>,

    /// Tests whose failure could not be retried. Non-empty only for aborted runs.
    #[serde(default)]
    pub non_retried: BTreeSet<SmolStr>,
}

impl RunSummary {
    /// Parses a summary from a JSON string.
    pub fn parse_json(json: impl AsRef<str>) -> Result<Self, SummaryReadError> {
        serde_json::from_str(json.as_ref()).map_err(SummaryReadError::Json)
    }

    /// Reads and parses a summary from the given path.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SummaryReadError> {
        let contents = std::fs::read_to_string(path).map_err(SummaryReadError::Io)?;
        Self::parse_json(contents)
    }

    /// Returns true if any test failed only under perturbation.
    pub fn has_flaky_tests(&self) -> bool {
        !self.aggregate_failures.is_empty()
    }
}

/// How the round loop of a run ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RunStatusSummary {
    /// Every allowed seeded round ran.
    Completed,

    /// The loop stopped early because a test could not be retried.
    Aborted {
        /// True if the abort was forced by the `simulate-non-retryable` override.
        simulated: bool,
    },
}

/// Summary of a single round.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct RoundSummary {
    /// The round's execution id, as written to the run log.
    pub execution_id: String,

    /// The seeded round index, or `None` for the baseline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,

    /// The seed the round ran under, or `None` for the baseline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Tests that failed in this round. For seeded rounds, baseline failures are already
    /// subtracted.
    pub failed: BTreeSet<SmolStr>,

    /// The number of tests that passed in this round.
    pub passed_count: usize,
}

impl RoundSummary {
    /// Creates a new round summary.
    pub fn new(
        execution_id: impl Into<String>,
        index: Option<usize>,
        seed: Option<u64>,
        failed: BTreeSet<SmolStr>,
        passed_count: usize,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            index,
            seed,
            failed,
            passed_count,
        }
    }

    /// Returns true if this summary describes the baseline round.
    pub fn is_baseline(&self) -> bool {
        self.index.is_none()
    }
}

impl RunSummary {
    /// Creates a new run summary.
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        run_id: impl Into<String>,
        base_seed: u64,
        max_rounds: u32,
        status: RunStatusSummary,
        baseline: RoundSummary,
        rounds: Vec<RoundSummary>,
        baseline_failures: BTreeSet<SmolStr>,
        aggregate_failures: BTreeSet<SmolStr>,
        non_retried: BTreeSet<SmolStr>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            base_seed,
            max_rounds,
            status,
            baseline,
            rounds,
            baseline_failures,
            aggregate_failures,
            non_retried,
        }
    }
}
