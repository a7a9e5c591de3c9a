// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Progress reporting for a flakehunt run.
//!
//! The orchestrator and report generator describe what they are doing as a stream of
//! [`RoundEvent`]s, delivered to a [`RoundEventSink`] that is created once per run and passed
//! to both by reference.

mod displayer;
mod events;
mod helpers;

pub use displayer::*;
pub use events::*;

use crate::{errors::DisplayErrorChain, orchestrator::RunStatus, round::RoundMode};
use tracing::{debug, info, warn};

/// Receives the events produced over the course of a run.
pub trait RoundEventSink {
    /// Reports a single event.
    ///
    /// Sinks must not fail: errors writing the event somewhere are the sink's own concern.
    fn report_event(&self, event: RoundEvent<'_>);
}

impl<T: RoundEventSink + ?Sized> RoundEventSink for &T {
    fn report_event(&self, event: RoundEvent<'_>) {
        (**self).report_event(event)
    }
}

/// A [`RoundEventSink`] that forwards events to [`tracing`].
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventSink;

impl RoundEventSink for TracingEventSink {
    fn report_event(&self, event: RoundEvent<'_>) {
        match event.kind {
            RoundEventKind::RunStarted {
                run_id,
                max_rounds,
                base_seed,
            } => {
                info!(%run_id, max_rounds, base_seed, "starting flakehunt run");
            }
            RoundEventKind::InstrumentationReady { artifact_dir } => {
                debug!(%artifact_dir, "instrumentation materialized");
            }
            RoundEventKind::RoundStarted { config, max_rounds } => {
                debug!(
                    execution_id = %config.execution_id(),
                    max_rounds,
                    "starting {config}",
                );
            }
            RoundEventKind::RoundFinished { record, result } => {
                let config = record.config();
                let (index, seed) = match config.mode() {
                    RoundMode::Baseline => (None, None),
                    RoundMode::Seeded { index, seed } => (Some(index), Some(seed)),
                };
                info!(
                    execution_id = %config.execution_id(),
                    ?index,
                    ?seed,
                    passed = record.passed_tests().len(),
                    failed = record.failed_tests().len(),
                    recovered = record.recovered_tests().len(),
                    non_retried = result.non_retried_tests().len(),
                    "finished {config}",
                );
            }
            RoundEventKind::RunAborted { reason } => {
                warn!("{}", reason.to_error());
            }
            RoundEventKind::ArtifactWritten { kind, path } => {
                debug!(%path, "wrote {kind}");
            }
            RoundEventKind::ArtifactWriteFailed { kind, path, error } => {
                warn!(
                    "could not write {kind} to {path}: {}",
                    DisplayErrorChain::new(error)
                );
            }
            RoundEventKind::RunFinished {
                run_id,
                status,
                rounds_run,
                baseline_failures,
                aggregate_failures,
            } => {
                let aborted = matches!(status, RunStatus::Aborted(_));
                info!(
                    %run_id,
                    aborted,
                    rounds_run,
                    baseline_failures = baseline_failures.len(),
                    flaky = aggregate_failures.len(),
                    "flakehunt run finished",
                );
            }
        }
    }
}
