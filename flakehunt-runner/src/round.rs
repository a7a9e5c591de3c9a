// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Round identities and configurations.
//!
//! A [`RoundConfiguration`] describes a single execution attempt: either the unperturbed
//! baseline, or a round under a specific seed. It is immutable once built. After the round
//! executes, [`RoundConfiguration::complete`] attaches the round's observed outcomes, producing
//! a [`RoundRecord`].

use crate::{
    errors::{ExecutionIdParseError, PerturbationModeParseError, PerturbationRangeError},
    result_processor::RoundResult,
    test_id::TestId,
};
use camino::{Utf8Path, Utf8PathBuf};
use newtype_uuid::{TypedUuid, TypedUuidKind, TypedUuidTag};
use regex::Regex;
use serde::Deserialize;
use std::{collections::BTreeSet, fmt, str::FromStr};

/// The kind of UUID used to identify rounds.
pub enum RoundKind {}

impl TypedUuidKind for RoundKind {
    #[inline]
    fn tag() -> TypedUuidTag {
        const TAG: TypedUuidTag = TypedUuidTag::new("flakehunt_round");
        TAG
    }
}

/// A UUID identifying a single round.
pub type RoundUuid = TypedUuid<RoundKind>;

static BASELINE_PREFIX: &str = "clean_";

/// The unique identity of a round.
///
/// Execution ids are freshly generated for every round and never reused. They are the join key
/// between the run log, the rendered report, and each round's output directory.
///
/// Baseline rounds display as `clean_<uuid>`, seeded rounds as the bare UUID.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ExecutionId {
    baseline: bool,
    uuid: RoundUuid,
}

impl ExecutionId {
    /// Generates a fresh id for a baseline round.
    pub fn new_baseline() -> Self {
        Self {
            baseline: true,
            uuid: RoundUuid::new_v4(),
        }
    }

    /// Generates a fresh id for a seeded round.
    pub fn new_seeded() -> Self {
        Self {
            baseline: false,
            uuid: RoundUuid::new_v4(),
        }
    }

    /// Returns true if this id belongs to a baseline round.
    pub fn is_baseline(&self) -> bool {
        self.baseline
    }

    /// Returns the underlying UUID.
    pub fn uuid(&self) -> RoundUuid {
        self.uuid
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.baseline {
            write!(f, "{BASELINE_PREFIX}{}", self.uuid)
        } else {
            write!(f, "{}", self.uuid)
        }
    }
}

impl FromStr for ExecutionId {
    type Err = ExecutionIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (baseline, uuid_str) = match s.strip_prefix(BASELINE_PREFIX) {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let uuid = uuid_str
            .parse()
            .map_err(|err| ExecutionIdParseError::new(s, err))?;
        Ok(Self { baseline, uuid })
    }
}

/// Whether a round is the baseline or a seeded round.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RoundMode {
    /// The unperturbed round that establishes which failures are pre-existing.
    Baseline,

    /// A round under a specific perturbation seed.
    Seeded {
        /// The index of this seeded round, starting from 0.
        index: usize,

        /// The seed, as derived by [`seed_for_round`](crate::seed::seed_for_round).
        seed: u64,
    },
}

impl RoundMode {
    /// Returns true for the baseline round.
    pub fn is_baseline(&self) -> bool {
        matches!(self, Self::Baseline)
    }

    /// Returns the seed for seeded rounds.
    pub fn seed(&self) -> Option<u64> {
        match self {
            Self::Baseline => None,
            Self::Seeded { seed, .. } => Some(*seed),
        }
    }

    /// Returns the seeded round index.
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::Baseline => None,
            Self::Seeded { index, .. } => Some(*index),
        }
    }
}

/// How aggressively the instrumentation perturbs non-deterministic operations.
///
/// flakehunt does not interpret the mode; it is passed through to the instrumented process.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PerturbationMode {
    /// Perturb every invocation.
    #[default]
    Full,

    /// Perturb one invocation per call site.
    One,

    /// Perturb only where equal elements may be reordered.
    Eq,

    /// Perturb identity-based operations (hash codes).
    Id,
}

impl PerturbationMode {
    /// Returns the string representation of this mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::One => "one",
            Self::Eq => "eq",
            Self::Id => "id",
        }
    }

    /// Returns the list of all known modes.
    pub fn variants() -> &'static [&'static str] {
        &["full", "one", "eq", "id"]
    }
}

impl fmt::Display for PerturbationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PerturbationMode {
    type Err = PerturbationModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "one" => Ok(Self::One),
            "eq" => Ok(Self::Eq),
            "id" => Ok(Self::Id),
            other => Err(PerturbationModeParseError::new(other)),
        }
    }
}

/// Inclusive bounds on the ordinal positions of perturbation points that may be perturbed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(try_from = "RawRange")]
pub struct PerturbationRange {
    start: u64,
    end: u64,
}

impl PerturbationRange {
    /// Creates a new range. `start` must not be greater than `end`.
    pub fn new(start: u64, end: u64) -> Result<Self, PerturbationRangeError> {
        if start > end {
            return Err(PerturbationRangeError::new(start, end));
        }
        Ok(Self { start, end })
    }

    /// Returns the first perturbed position.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Returns the last perturbed position.
    pub fn end(&self) -> u64 {
        self.end
    }
}

#[derive(Deserialize)]
struct RawRange {
    start: u64,
    end: u64,
}

impl TryFrom<RawRange> for PerturbationRange {
    type Error = PerturbationRangeError;

    fn try_from(raw: RawRange) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
    }
}

/// Perturbation settings shared by every seeded round of a run.
#[derive(Clone, Debug, Default)]
pub struct PerturbationSettings {
    /// The perturbation mode.
    pub mode: PerturbationMode,

    /// If set, only code running within tests whose names match this pattern is perturbed.
    pub test_name_filter: Option<Regex>,

    /// If set, only perturbation points within this range are perturbed.
    pub range: Option<PerturbationRange>,
}

/// The configuration of a single round.
#[derive(Clone, Debug)]
pub struct RoundConfiguration {
    execution_id: ExecutionId,
    mode: RoundMode,
    // None for the baseline.
    perturbation: Option<PerturbationSettings>,
    output_dir: Utf8PathBuf,
    artifact_dir: Utf8PathBuf,
}

impl RoundConfiguration {
    /// Builds the configuration for the baseline round.
    ///
    /// The round's output directory is created under `run_dir`, named after its execution id.
    pub fn baseline(run_dir: &Utf8Path, artifact_dir: &Utf8Path) -> Self {
        let execution_id = ExecutionId::new_baseline();
        Self {
            execution_id,
            mode: RoundMode::Baseline,
            perturbation: None,
            output_dir: run_dir.join(execution_id.to_string()),
            artifact_dir: artifact_dir.to_owned(),
        }
    }

    /// Builds the configuration for the seeded round at `index`.
    pub fn seeded(
        index: usize,
        seed: u64,
        perturbation: PerturbationSettings,
        run_dir: &Utf8Path,
        artifact_dir: &Utf8Path,
    ) -> Self {
        let execution_id = ExecutionId::new_seeded();
        Self {
            execution_id,
            mode: RoundMode::Seeded { index, seed },
            perturbation: Some(perturbation),
            output_dir: run_dir.join(execution_id.to_string()),
            artifact_dir: artifact_dir.to_owned(),
        }
    }

    /// Returns the execution id.
    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    /// Returns whether this is the baseline or a seeded round.
    pub fn mode(&self) -> RoundMode {
        self.mode
    }

    /// Returns true for the baseline round.
    pub fn is_baseline(&self) -> bool {
        self.mode.is_baseline()
    }

    /// Returns the perturbation settings, or `None` for the baseline.
    pub fn perturbation(&self) -> Option<&PerturbationSettings> {
        self.perturbation.as_ref()
    }

    /// Returns the directory for round-scoped output.
    pub fn output_dir(&self) -> &Utf8Path {
        &self.output_dir
    }

    /// Returns the directory holding the instrumentation artifact.
    pub fn artifact_dir(&self) -> &Utf8Path {
        &self.artifact_dir
    }

    /// Attaches the outcomes observed during this round, producing a record of it.
    ///
    /// This consumes the configuration, so failures can be attached at most once.
    pub fn complete(self, result: &RoundResult) -> RoundRecord {
        RoundRecord {
            config: self,
            failed_tests: result.failed_tests().test_ids().collect(),
            passed_tests: result.passed_tests().clone(),
            recovered_tests: result.recovered_tests().clone(),
            also_failed_in_baseline: BTreeSet::new(),
        }
    }
}

impl fmt::Display for RoundConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            RoundMode::Baseline => write!(f, "baseline"),
            RoundMode::Seeded { index, seed } => write!(f, "seed {index} ({seed})"),
        }
    }
}

/// A key-value parameter passed to the worker process that executes a round.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkerParam {
    key: &'static str,
    value: String,
}

impl WorkerParam {
    pub(crate) fn new(key: &'static str, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }

    /// Returns the parameter name, suitable for use as an environment variable.
    pub fn key(&self) -> &'static str {
        self.key
    }

    /// Returns the parameter value.
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Worker parameter names.
pub mod worker_keys {
    /// The round's execution id.
    pub const EXECUTION_ID: &str = "FLAKEHUNT_EXECUTION_ID";
    /// `1` if the worker should apply perturbation, `0` for the baseline.
    pub const PERTURB: &str = "FLAKEHUNT_PERTURB";
    /// The round's seed.
    pub const SEED: &str = "FLAKEHUNT_SEED";
    /// The perturbation mode.
    pub const MODE: &str = "FLAKEHUNT_MODE";
    /// The test name filter pattern.
    pub const FILTER: &str = "FLAKEHUNT_FILTER";
    /// The first perturbed position.
    pub const RANGE_START: &str = "FLAKEHUNT_RANGE_START";
    /// The last perturbed position.
    pub const RANGE_END: &str = "FLAKEHUNT_RANGE_END";
    /// The round's output directory.
    pub const OUTPUT_DIR: &str = "FLAKEHUNT_OUTPUT_DIR";
    /// The instrumentation artifact directory.
    pub const ARTIFACT_DIR: &str = "FLAKEHUNT_ARTIFACT_DIR";
    /// Newline-separated `include-classes` patterns.
    pub const INCLUDE_CLASSES: &str = "FLAKEHUNT_INCLUDE_CLASSES";
    /// Newline-separated `include-annotations` patterns.
    pub const INCLUDE_ANNOTATIONS: &str = "FLAKEHUNT_INCLUDE_ANNOTATIONS";
    /// Newline-separated `exclude-classes` patterns.
    pub const EXCLUDE_CLASSES: &str = "FLAKEHUNT_EXCLUDE_CLASSES";
    /// Newline-separated `exclude-annotations` patterns.
    pub const EXCLUDE_ANNOTATIONS: &str = "FLAKEHUNT_EXCLUDE_ANNOTATIONS";
}

/// Computes the parameters a worker process needs to execute `config`.
///
/// This depends only on the configuration: locating the instrumentation artifact is the
/// instrumentation provider's job, and its location is already part of the configuration.
pub fn worker_params(config: &RoundConfiguration) -> Vec<WorkerParam> {
    let mut params = vec![
        WorkerParam::new(
            worker_keys::EXECUTION_ID,
            config.execution_id().to_string(),
        ),
        WorkerParam::new(worker_keys::OUTPUT_DIR, config.output_dir().as_str()),
        WorkerParam::new(worker_keys::ARTIFACT_DIR, config.artifact_dir().as_str()),
    ];

    match (config.mode(), config.perturbation()) {
        (RoundMode::Seeded { seed, .. }, Some(perturbation)) => {
            params.push(WorkerParam::new(worker_keys::PERTURB, "1"));
            params.push(WorkerParam::new(worker_keys::SEED, seed.to_string()));
            params.push(WorkerParam::new(
                worker_keys::MODE,
                perturbation.mode.as_str(),
            ));
            if let Some(filter) = &perturbation.test_name_filter {
                params.push(WorkerParam::new(worker_keys::FILTER, filter.as_str()));
            }
            if let Some(range) = &perturbation.range {
                params.push(WorkerParam::new(
                    worker_keys::RANGE_START,
                    range.start().to_string(),
                ));
                params.push(WorkerParam::new(
                    worker_keys::RANGE_END,
                    range.end().to_string(),
                ));
            }
        }
        _ => {
            params.push(WorkerParam::new(worker_keys::PERTURB, "0"));
        }
    }

    params
}

/// A round that has finished executing, along with its observed outcomes.
#[derive(Clone, Debug)]
pub struct RoundRecord {
    config: RoundConfiguration,
    failed_tests: BTreeSet<TestId>,
    passed_tests: BTreeSet<TestId>,
    recovered_tests: BTreeSet<TestId>,
    also_failed_in_baseline: BTreeSet<TestId>,
}

impl RoundRecord {
    /// Returns the configuration the round ran with.
    pub fn config(&self) -> &RoundConfiguration {
        &self.config
    }

    /// Returns the tests that failed in this round.
    ///
    /// For seeded rounds, this excludes baseline failures once
    /// [`subtract_baseline`](Self::subtract_baseline) has been called.
    pub fn failed_tests(&self) -> &BTreeSet<TestId> {
        &self.failed_tests
    }

    /// Returns the tests that passed in this round.
    pub fn passed_tests(&self) -> &BTreeSet<TestId> {
        &self.passed_tests
    }

    /// Returns the tests that passed in this round after failing in an earlier round.
    pub fn recovered_tests(&self) -> &BTreeSet<TestId> {
        &self.recovered_tests
    }

    /// Returns the tests that failed in this round but were removed from
    /// [`failed_tests`](Self::failed_tests) because they also failed without perturbation.
    pub fn also_failed_in_baseline(&self) -> &BTreeSet<TestId> {
        &self.also_failed_in_baseline
    }

    /// Returns the number of tests executed in this round.
    pub fn executed_count(&self) -> usize {
        self.failed_tests.len() + self.also_failed_in_baseline.len() + self.passed_tests.len()
    }

    /// Moves every test in `baseline_failures` out of this round's failures.
    ///
    /// Tests that fail without perturbation are never counted as perturbation-induced, but remain
    /// visible through [`also_failed_in_baseline`](Self::also_failed_in_baseline). Calling this
    /// more than once has no further effect. The baseline round itself is left untouched.
    ///
    /// Returns the number of failures moved.
    pub fn subtract_baseline(&mut self, baseline_failures: &BTreeSet<TestId>) -> usize {
        if self.config.is_baseline() {
            return 0;
        }
        let (shared, induced) = std::mem::take(&mut self.failed_tests)
            .into_iter()
            .partition::<BTreeSet<_>, _>(|id| baseline_failures.contains(id));
        self.failed_tests = induced;
        let moved = shared.len();
        self.also_failed_in_baseline.extend(shared);
        moved
    }
}
