// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    orchestrator::{AbortReason, RunStatus},
    result_processor::RoundResult,
    round::{RoundConfiguration, RoundRecord},
    test_id::TestId,
};
use camino::Utf8Path;
use chrono::{DateTime, FixedOffset, Local};
use quick_junit::ReportUuid;
use std::{collections::BTreeSet, error, fmt};

/// An event produced over the course of a run.
///
/// Events are produced by a [`RoundOrchestrator`](crate::orchestrator::RoundOrchestrator) and
/// its [`ReportGenerator`](crate::report::ReportGenerator), and consumed by a
/// [`RoundEventSink`](super::RoundEventSink).
#[derive(Clone, Debug)]
pub struct RoundEvent<'a> {
    /// The time at which the event was generated, including the offset from UTC.
    pub timestamp: DateTime<FixedOffset>,

    /// The kind of event this is.
    pub kind: RoundEventKind<'a>,
}

impl<'a> RoundEvent<'a> {
    /// Creates a new event of the given kind, timestamped now.
    pub fn new(kind: RoundEventKind<'a>) -> Self {
        Self {
            timestamp: Local::now().fixed_offset(),
            kind,
        }
    }
}

/// The kind of event this is.
///
/// Forms part of [`RoundEvent`].
#[derive(Clone, Debug)]
pub enum RoundEventKind<'a> {
    /// The run started.
    RunStarted {
        /// The UUID for this run.
        run_id: ReportUuid,

        /// The maximum number of seeded rounds. Zero means a single unperturbed execution.
        max_rounds: u32,

        /// The base seed that per-round seeds are derived from.
        base_seed: u64,
    },

    /// The instrumentation artifact was materialized.
    InstrumentationReady {
        /// The directory the artifact was placed in.
        artifact_dir: &'a Utf8Path,
    },

    /// A round is about to be executed.
    RoundStarted {
        /// The round's configuration.
        config: &'a RoundConfiguration,

        /// The maximum number of seeded rounds in this run.
        max_rounds: u32,
    },

    /// A round finished executing.
    RoundFinished {
        /// The finished round.
        record: &'a RoundRecord,

        /// The round's result, as produced by the result processor.
        result: &'a RoundResult,
    },

    /// The round loop stopped before every seeded round ran.
    RunAborted {
        /// Why the loop stopped.
        reason: &'a AbortReason,
    },

    /// An artifact was written.
    ArtifactWritten {
        /// The kind of artifact.
        kind: ArtifactKind,

        /// Where it was written.
        path: &'a Utf8Path,
    },

    /// An artifact could not be written. The run continues regardless.
    ArtifactWriteFailed {
        /// The kind of artifact.
        kind: ArtifactKind,

        /// The path that could not be written.
        path: &'a Utf8Path,

        /// The error that occurred.
        error: &'a (dyn error::Error + 'static),
    },

    /// The run finished, and the report was generated.
    RunFinished {
        /// The UUID for this run.
        run_id: ReportUuid,

        /// How the round loop ended.
        status: &'a RunStatus,

        /// The number of seeded rounds that executed.
        rounds_run: usize,

        /// Tests that failed without perturbation.
        baseline_failures: &'a BTreeSet<TestId>,

        /// Tests that failed in at least one seeded round, with baseline failures removed.
        aggregate_failures: &'a BTreeSet<TestId>,
    },
}

/// A kind of file written while reporting a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArtifactKind {
    /// The append-only log of finished rounds.
    RunLog,

    /// The rendered Markdown report.
    Report,

    /// The machine-readable JSON summary.
    Summary,

    /// The JUnit XML report.
    Junit,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunLog => write!(f, "run log"),
            Self::Report => write!(f, "report"),
            Self::Summary => write!(f, "summary"),
            Self::Junit => write!(f, "JUnit report"),
        }
    }
}
