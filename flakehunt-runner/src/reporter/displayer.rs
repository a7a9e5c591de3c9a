// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    RoundEventSink,
    events::{RoundEvent, RoundEventKind},
    helpers::Styles,
};
use crate::{
    errors::DisplayErrorChain,
    helpers::plural,
    orchestrator::RunStatus,
    round::{RoundConfiguration, RoundMode},
};
use owo_colors::OwoColorize;
use std::{
    io::{self, Write},
    sync::{Mutex, PoisonError},
};

/// A [`RoundEventSink`] that writes human-readable progress to a writer, typically standard
/// error.
///
/// Write errors don't interrupt the run. The first one is stored, and returned by
/// [`finish`](Self::finish).
#[derive(Debug)]
pub struct DisplayReporter<W> {
    inner: Mutex<DisplayReporterInner<W>>,
}

#[derive(Debug)]
struct DisplayReporterInner<W> {
    writer: W,
    styles: Styles,
    verbose: bool,
    error: Option<io::Error>,
}

impl<W: Write> DisplayReporter<W> {
    /// Creates a new reporter that writes to `writer`, without colors.
    pub fn new(writer: W) -> Self {
        Self {
            inner: Mutex::new(DisplayReporterInner {
                writer,
                styles: Styles::default(),
                verbose: false,
                error: None,
            }),
        }
    }

    /// Enables colorized output.
    pub fn colorize(self) -> Self {
        self.with_inner(|inner| inner.styles.colorize())
    }

    /// Also print the start of every round, and every artifact that was written.
    pub fn verbose(self, verbose: bool) -> Self {
        self.with_inner(|inner| inner.verbose = verbose)
    }

    /// Consumes the reporter, returning the writer, or the first error that occurred while
    /// writing to it.
    pub fn finish(self) -> io::Result<W> {
        let mut inner = self
            .inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(error) = inner.error.take() {
            return Err(error);
        }
        inner.writer.flush()?;
        Ok(inner.writer)
    }

    fn with_inner(mut self, f: impl FnOnce(&mut DisplayReporterInner<W>)) -> Self {
        f(self
            .inner
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner));
        self
    }
}

impl<W: Write> RoundEventSink for DisplayReporter<W> {
    fn report_event(&self, event: RoundEvent<'_>) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.error.is_some() {
            return;
        }
        if let Err(error) = inner.write_event(&event) {
            inner.error = Some(error);
        }
    }
}

impl<W: Write> DisplayReporterInner<W> {
    fn write_event(&mut self, event: &RoundEvent<'_>) -> io::Result<()> {
        let styles = &self.styles;
        let writer = &mut self.writer;

        match &event.kind {
            RoundEventKind::RunStarted {
                run_id,
                max_rounds,
                base_seed,
            } => {
                write!(writer, "{:>12} ", "Flakehunt".style(styles.pass))?;
                write!(writer, "run ID {}", run_id.style(styles.count))?;
                if *max_rounds == 0 {
                    writeln!(writer, ": single unperturbed execution")?;
                } else {
                    let max_rounds = *max_rounds as usize;
                    writeln!(
                        writer,
                        ": up to {} seeded {}, base seed {}",
                        max_rounds.style(styles.count),
                        plural::rounds_str(max_rounds),
                        base_seed.style(styles.seed),
                    )?;
                }
            }
            RoundEventKind::InstrumentationReady { artifact_dir } => {
                if self.verbose {
                    writeln!(
                        writer,
                        "{:>12} artifacts in {artifact_dir}",
                        "Instrumented".style(styles.pass),
                    )?;
                }
            }
            RoundEventKind::RoundStarted { config, max_rounds } => {
                if self.verbose {
                    write!(writer, "{:>12} ", "Starting".style(styles.pass))?;
                    write_round_name(writer, styles, config)?;
                    if let RoundMode::Seeded { index, .. } = config.mode() {
                        write!(writer, " [{}/{max_rounds}]", index + 1)?;
                    }
                    writeln!(writer)?;
                }
            }
            RoundEventKind::RoundFinished { record, result } => {
                let failed = record.failed_tests().len();
                let status_style = if failed == 0 { styles.pass } else { styles.fail };
                write!(writer, "{:>12} ", "Finished".style(status_style))?;
                write_round_name(writer, styles, record.config())?;
                write!(
                    writer,
                    ": {} passed, {} failed",
                    record.passed_tests().len().style(styles.count),
                    failed.style(if failed == 0 { styles.count } else { styles.fail }),
                )?;
                let recovered = record.recovered_tests().len();
                if recovered > 0 {
                    write!(
                        writer,
                        ", {} recovered",
                        recovered.style(styles.recovered)
                    )?;
                }
                let non_retried = result.non_retried_tests().len();
                if non_retried > 0 {
                    write!(
                        writer,
                        ", {} not retried",
                        non_retried.style(styles.abort)
                    )?;
                }
                writeln!(writer)?;
            }
            RoundEventKind::RunAborted { reason } => {
                write!(writer, "{:>12} ", "Aborted".style(styles.abort))?;
                writeln!(writer, "{}", reason.to_error())?;
            }
            RoundEventKind::ArtifactWritten { kind, path } => {
                if self.verbose {
                    writeln!(writer, "{:>12} {kind} to {path}", "Wrote".style(styles.pass))?;
                }
            }
            RoundEventKind::ArtifactWriteFailed { kind, path, error } => {
                write!(writer, "{:>12} ", "Warning".style(styles.abort))?;
                writeln!(
                    writer,
                    "could not write {kind} to {path}: {}",
                    DisplayErrorChain::new(*error),
                )?;
            }
            RoundEventKind::RunFinished {
                run_id: _,
                status,
                rounds_run,
                baseline_failures,
                aggregate_failures,
            } => {
                let summary_style = match status {
                    RunStatus::Completed if aggregate_failures.is_empty() => styles.pass,
                    RunStatus::Completed => styles.fail,
                    RunStatus::Aborted(_) => styles.abort,
                };
                write!(writer, "{:>12} ", "Summary".style(summary_style))?;
                writeln!(
                    writer,
                    "{} seeded {} run, {} baseline {}, {} flaky {}",
                    rounds_run.style(styles.count),
                    plural::rounds_str(*rounds_run),
                    baseline_failures.len().style(styles.count),
                    plural::failures_str(baseline_failures.len()),
                    aggregate_failures.len().style(if aggregate_failures.is_empty() {
                        styles.count
                    } else {
                        styles.fail
                    }),
                    plural::tests_str(aggregate_failures.len()),
                )?;
                for test in aggregate_failures.iter() {
                    writeln!(writer, "{:>12} {test}", "FLAKY".style(styles.fail))?;
                }
            }
        }

        Ok(())
    }
}

fn write_round_name(
    writer: &mut dyn Write,
    styles: &Styles,
    config: &RoundConfiguration,
) -> io::Result<()> {
    match config.mode() {
        RoundMode::Baseline => write!(writer, "baseline"),
        RoundMode::Seeded { index, seed } => {
            write!(writer, "seed {index} ({})", seed.style(styles.seed))
        }
    }
}
