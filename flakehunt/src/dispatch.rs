// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError, Result,
    output::{OutputContext, OutputOpts, OutputWriter},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use flakehunt_runner::{
    config::{FlakehuntConfig, MaxFailures},
    engine::ProcessEngine,
    instrumentation::{CommandInstrumentation, InstrumentationProvider, NoInstrumentation},
    orchestrator::{OrchestratorOutcome, RoundOrchestratorBuilder},
    report::RunLog,
    run_dir::RUN_LOG_FILE_NAME,
    seed::{DEFAULT_BASE_SEED, seed_for_round},
};
use std::io::Write;
use tracing::info;

/// Finds tests that only fail under seeded perturbation.
///
/// flakehunt executes the test suite once without perturbation, then once per seed, and reports
/// the tests that failed under a seed but not without perturbation.
#[derive(Debug, Parser)]
#[command(
    version,
    bin_name = "flakehunt",
    styles = crate::output::clap_styles::style(),
    max_term_width = 100,
)]
pub struct FlakehuntApp {
    #[clap(flatten)]
    output: OutputOpts,

    #[clap(subcommand)]
    command: Command,
}

impl FlakehuntApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app.
    ///
    /// Returns the exit code.
    pub fn exec(self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<i32> {
        match self.command {
            Command::Run(opts) => opts.exec(output, output_writer),
            Command::ShowRunLog { run_dir } => exec_show_run_log(&run_dir, output_writer),
            Command::Seed { index, base_seed } => {
                let mut stdout = output_writer.stdout_writer();
                writeln!(stdout, "{}", seed_for_round(index, base_seed))
                    .and_then(|()| stdout.flush())
                    .map_err(ExpectedError::write_output)?;
                Ok(0)
            }
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the test suite without perturbation, then once per seed
    ///
    /// The exit code is 0 if no test failed only under perturbation, and 100 if any did.
    Run(Box<RunOpts>),

    /// Print the execution ids of the rounds that finished in a run
    ///
    /// The baseline round's id is prefixed with `clean_`. The log is read back even if the run
    /// was interrupted.
    ShowRunLog {
        /// The run directory, usually `target/flakehunt/<profile>/runs/<run-id>`
        #[arg(value_name = "RUN_DIR")]
        run_dir: Utf8PathBuf,
    },

    /// Print the seed used for a seeded round
    Seed {
        /// The 0-based index of the seeded round
        index: usize,

        /// The base seed of the run
        #[arg(long, value_name = "SEED", default_value_t = DEFAULT_BASE_SEED)]
        base_seed: u64,
    },
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Config options")]
struct ConfigOpts {
    /// Workspace root, containing `.config/flakehunt.toml` [default: current directory]
    #[arg(long, value_name = "DIR")]
    workspace_root: Option<Utf8PathBuf>,

    /// Config file [default: workspace-root/.config/flakehunt.toml]
    #[arg(long, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    /// The flakehunt profile to use
    #[arg(
        long,
        short = 'P',
        env = "FLAKEHUNT_PROFILE",
        value_name = "PROFILE",
        default_value = FlakehuntConfig::DEFAULT_PROFILE,
    )]
    profile: String,
}

impl ConfigOpts {
    fn workspace_root(&self) -> Result<Utf8PathBuf> {
        match &self.workspace_root {
            Some(root) => Ok(root.clone()),
            None => {
                let current_dir = std::env::current_dir()
                    .map_err(|err| ExpectedError::CurrentDirFailed { err })?;
                Utf8PathBuf::try_from(current_dir)
                    .map_err(|err| ExpectedError::CurrentDirInvalidUtf8 { err })
            }
        }
    }
}

#[derive(Debug, Args)]
struct RunOpts {
    #[clap(flatten)]
    config_opts: ConfigOpts,

    /// Maximum number of seeded rounds; 0 executes the suite once without perturbation
    #[arg(long, value_name = "N", help_heading = "Round options")]
    rounds: Option<u32>,

    /// Base seed that every round's seed is derived from
    #[arg(long, value_name = "SEED", help_heading = "Round options")]
    base_seed: Option<u64>,

    /// Number of seeded-round failures after which a test is no longer retried
    #[arg(
        long,
        value_name = "N|unlimited",
        help_heading = "Round options"
    )]
    max_failures_per_test: Option<MaxFailures>,

    /// Stop after the first seeded round as if a test could not be retried
    #[arg(long, help_heading = "Round options")]
    simulate_non_retryable: bool,
}

impl RunOpts {
    fn exec(self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<i32> {
        let workspace_root = self.config_opts.workspace_root()?;
        let config = FlakehuntConfig::from_sources(
            &workspace_root,
            self.config_opts.config_file.as_deref(),
        )?;
        let profile = config.profile(&self.config_opts.profile)?;

        let engine_command =
            profile
                .engine_command()
                .ok_or_else(|| ExpectedError::EngineCommandMissing {
                    profile: profile.name().to_owned(),
                })?;
        let mut engine = ProcessEngine::new(engine_command.clone()).with_cwd(&workspace_root);
        let mut instrumentation: Box<dyn InstrumentationProvider> =
            match profile.instrumentation_command() {
                Some(command) => Box::new(
                    CommandInstrumentation::new(command.clone()).with_cwd(&workspace_root),
                ),
                None => Box::new(NoInstrumentation),
            };

        let mut builder = RoundOrchestratorBuilder::from_profile(&profile);
        if let Some(rounds) = self.rounds {
            builder.set_max_rounds(rounds);
        }
        if let Some(base_seed) = self.base_seed {
            builder.set_base_seed(base_seed);
        }
        if let Some(max_failures) = self.max_failures_per_test {
            builder.set_max_failures(max_failures);
        }
        if self.simulate_non_retryable {
            builder.set_simulate_non_retryable(true);
        }

        let reporter = output.display_reporter(output_writer.stderr_writer());
        let result = builder
            .build(profile.store_dir(), &reporter)
            .run(&mut engine, &mut *instrumentation);
        reporter
            .finish()
            .and_then(|mut writer| writer.flush())
            .map_err(ExpectedError::write_output)?;

        match result? {
            OrchestratorOutcome::Unperturbed(record) => {
                info!(
                    "executed {} tests without perturbation ({} failed)",
                    record.passed_tests().len() + record.failed_tests().len(),
                    record.failed_tests().len(),
                );
                Ok(0)
            }
            OrchestratorOutcome::Finished(outcome) => {
                outcome.check_non_retried()?;
                let count = outcome.report().aggregate_failures().len();
                if count > 0 {
                    return Err(ExpectedError::FlakyTestsDetected { count });
                }
                Ok(0)
            }
        }
    }
}

fn exec_show_run_log(run_dir: &Utf8Path, output_writer: &mut OutputWriter) -> Result<i32> {
    let ids = RunLog::read(&run_dir.join(RUN_LOG_FILE_NAME)).map_err(|err| {
        ExpectedError::RunLogReadError {
            run_dir: run_dir.to_owned(),
            err,
        }
    })?;

    let mut stdout = output_writer.stdout_writer();
    for id in ids {
        writeln!(stdout, "{id}").map_err(ExpectedError::write_output)?;
    }
    stdout.flush().map_err(ExpectedError::write_output)?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Color;
    use camino_tempfile::Utf8TempDir;
    use clap::CommandFactory;
    use flakehunt_metadata::FlakehuntExitCode;
    use flakehunt_runner::round::ExecutionId;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn output() -> OutputContext {
        OutputContext {
            verbose: false,
            color: Color::Never,
        }
    }

    fn capture() -> OutputWriter {
        OutputWriter::Test {
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    fn stdout(writer: OutputWriter) -> String {
        match writer {
            OutputWriter::Test { stdout, .. } => String::from_utf8(stdout).expect("valid UTF-8"),
            OutputWriter::Normal => unreachable!("output is captured in tests"),
        }
    }

    #[test_case(&["flakehunt", "run"] ; "run with defaults")]
    #[test_case(&["flakehunt", "run", "--rounds", "0"] ; "unperturbed")]
    #[test_case(
        &["flakehunt", "run", "-P", "ci", "--max-failures-per-test", "unlimited"]
        ; "profile and unlimited failures"
    )]
    #[test_case(
        &["flakehunt", "--color", "never", "run", "--base-seed", "42", "--simulate-non-retryable"]
        ; "seed overrides"
    )]
    #[test_case(&["flakehunt", "show-run-log", "target/flakehunt/default/runs/x"] ; "show run log")]
    #[test_case(&["flakehunt", "seed", "3", "--base-seed", "7"] ; "seed")]
    fn valid_args(args: &[&str]) {
        if let Err(error) = FlakehuntApp::try_parse_from(args) {
            panic!("{args:?} should parse, got:\n{error}");
        }
    }

    #[test_case(&["flakehunt", "run", "--rounds", "-1"] ; "negative rounds")]
    #[test_case(&["flakehunt", "run", "--max-failures-per-test", "0"] ; "zero failures")]
    #[test_case(&["flakehunt", "run", "--max-failures-per-test", "many"] ; "non-numeric failures")]
    #[test_case(&["flakehunt", "seed"] ; "missing index")]
    fn invalid_args(args: &[&str]) {
        assert!(
            FlakehuntApp::try_parse_from(args).is_err(),
            "{args:?} should fail to parse"
        );
    }

    #[test_case("color", "FLAKEHUNT_COLOR" ; "color")]
    #[test_case("verbose", "FLAKEHUNT_VERBOSE" ; "verbose")]
    fn output_options_read_flakehunt_env(id: &str, env: &str) {
        let command = FlakehuntApp::command();
        let arg = command
            .get_arguments()
            .find(|arg| arg.get_id() == id)
            .unwrap_or_else(|| panic!("argument `{id}` exists"));
        assert_eq!(arg.get_env(), Some(std::ffi::OsStr::new(env)));
    }

    #[test]
    fn seed_prints_round_seed() {
        let app = FlakehuntApp::try_parse_from(["flakehunt", "seed", "2", "--base-seed", "11"])
            .expect("valid args");
        let mut writer = capture();
        let code = app.exec(output(), &mut writer).expect("seed succeeds");

        assert_eq!(code, 0);
        assert_eq!(stdout(writer), format!("{}\n", seed_for_round(2, 11)));
    }

    #[test]
    fn show_run_log_lists_finished_rounds() {
        let run_dir = Utf8TempDir::new().expect("created temp dir");
        let ids = [
            ExecutionId::new_baseline(),
            ExecutionId::new_seeded(),
            ExecutionId::new_seeded(),
        ];
        let mut run_log = RunLog::create(run_dir.path().join(RUN_LOG_FILE_NAME))
            .expect("created run log");
        for id in ids {
            run_log.append(id).expect("appended to run log");
        }

        let app = FlakehuntApp::try_parse_from([
            "flakehunt",
            "show-run-log",
            run_dir.path().as_str(),
        ])
        .expect("valid args");
        let mut writer = capture();
        app.exec(output(), &mut writer).expect("show-run-log succeeds");

        let expected: String = ids.iter().map(|id| format!("{id}\n")).collect();
        let stdout = stdout(writer);
        assert_eq!(stdout, expected);
        assert!(stdout.starts_with("clean_"));
    }

    #[test]
    fn run_requires_engine_command() {
        let workspace = Utf8TempDir::new().expect("created temp dir");
        let app = FlakehuntApp::try_parse_from([
            "flakehunt",
            "run",
            "--workspace-root",
            workspace.path().as_str(),
        ])
        .expect("valid args");

        let error = app
            .exec(output(), &mut capture())
            .expect_err("default config has no engine command");
        assert!(
            matches!(
                &error,
                ExpectedError::EngineCommandMissing { profile } if profile == "default"
            ),
            "{error:?}"
        );
        assert_eq!(error.process_exit_code(), FlakehuntExitCode::SETUP_ERROR);
    }
}
