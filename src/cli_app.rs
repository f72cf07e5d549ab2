//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::{CommandFactory, Parser};
use clap_complete::{Shell as CompletionShell, generate};
use colored::control;
use thiserror::Error;

use replica_sync::core::config::{Config, interval_from_secs};
use replica_sync::core::errors::SyncError;
use replica_sync::daemon::loop_main::{Scheduler, SchedulerConfig, run_service};
use replica_sync::daemon::signals::SignalHandler;
use replica_sync::logger::line::LogFormat;
use replica_sync::logger::sink::ActionLogger;
use replica_sync::mirror::comparator::CompareMode;
use replica_sync::mirror::reconcile::{SpecialFilePolicy, SymlinkPolicy};

/// Periodic one-way mirror of SOURCE into REPLICA, logging every action to LOG_FILE.
#[derive(Debug, Parser)]
#[command(
    name = "replsync",
    author,
    version,
    about = "Keep a replica directory tree identical to a source tree",
    long_about = None,
    allow_negative_numbers = true
)]
pub struct Cli {
    /// Directory to mirror from. Must exist.
    #[arg(value_name = "SOURCE", required_unless_present_any = ["completions", "config"])]
    source: Option<PathBuf>,
    /// Directory to mirror into. Created if missing.
    #[arg(value_name = "REPLICA", required_unless_present_any = ["completions", "config"])]
    replica: Option<PathBuf>,
    /// Seconds between the end of one sync and the start of the next (fractions allowed).
    #[arg(
        value_name = "INTERVAL",
        value_parser = parse_interval,
        required_unless_present_any = ["completions", "config"]
    )]
    interval: Option<f64>,
    /// Action log file. Created if missing; must be outside both trees.
    #[arg(value_name = "LOG_FILE", required_unless_present_any = ["completions", "config"])]
    log_file: Option<PathBuf>,

    /// Read settings from this TOML file; positional arguments override it.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Run a single sync and exit (exit code 4 if it reported errors).
    #[arg(long, conflicts_with = "ticks")]
    once: bool,
    /// Stop after N syncs.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    ticks: Option<u64>,
    /// Report what would change without touching the replica.
    #[arg(long)]
    dry_run: bool,
    /// How stale files are detected.
    #[arg(long, value_enum, value_name = "MODE")]
    compare: Option<CompareMode>,
    /// What to do with symbolic links in the source.
    #[arg(long, value_enum, value_name = "POLICY")]
    symlinks: Option<SymlinkPolicy>,
    /// What to do with sockets, FIFOs and devices in the source.
    #[arg(long, value_enum, value_name = "POLICY")]
    special_files: Option<SpecialFilePolicy>,
    /// Layout of the log file lines.
    #[arg(long, value_enum, value_name = "FORMAT")]
    log_format: Option<LogFormat>,
    /// Do not echo log lines to stdout.
    #[arg(long)]
    no_console: bool,
    /// Disable colored output.
    #[arg(long)]
    no_color: bool,
    /// Print a shell completion script and exit.
    #[arg(long, value_enum, value_name = "SHELL", exclusive = true)]
    completions: Option<CompletionShell>,
}

/// Top-level CLI error type.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid arguments or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// The run finished but reported errors.
    #[error("{0}")]
    Partial(String),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Partial(_) => 4,
        }
    }
}

impl From<SyncError> for CliError {
    fn from(err: SyncError) -> Self {
        if err.is_configuration() {
            Self::User(err.to_string())
        } else {
            Self::Runtime(err.to_string())
        }
    }
}

/// Parse and validate the INTERVAL argument.
fn parse_interval(raw: &str) -> Result<f64, String> {
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|e| format!("{raw:?} is not a number of seconds: {e}"))?;
    interval_from_secs(secs).map_err(|e| e.to_string())?;
    Ok(secs)
}

/// Dispatch the CLI.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color || !io::stdout().is_terminal() {
        control::set_override(false);
    }

    if let Some(shell) = cli.completions {
        let mut command = Cli::command();
        let binary_name = command.get_name().to_string();
        generate(shell, &mut command, binary_name, &mut io::stdout());
        return Ok(());
    }

    let config = build_config(cli)?;
    let max_ticks = if cli.once { Some(1) } else { cli.ticks };
    let scheduler_config = SchedulerConfig::from_config(&config)?.with_max_ticks(max_ticks);
    let mut scheduler = Scheduler::new(scheduler_config, SignalHandler::new())?;
    let mut logger = ActionLogger::open(config.log_writer_config(), config.logging.console);

    if cli.once {
        let report = scheduler.run_once(&mut logger);
        let summary = report.summary();
        if summary.errors > 0 {
            return Err(CliError::Partial(format!(
                "sync finished with errors: {summary}"
            )));
        }
        return Ok(());
    }

    let summary = run_service(&config, &mut scheduler, &mut logger);
    eprintln!(
        "[RSY-DAEMON] stopped ({}) after {} ticks: {} changes, {} errors, log writer {}",
        summary.stop_reason.label(),
        summary.ticks,
        summary.changes,
        summary.errors,
        logger.writer_state().label()
    );
    Ok(())
}

/// Config file, then env, then command-line flags, then validation.
fn build_config(cli: &Cli) -> Result<Config, CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    apply_cli_overrides(&mut config, cli);
    config.prepare()?;
    Ok(config)
}

fn apply_cli_overrides(config: &mut Config, cli: &Cli) {
    if let Some(source) = &cli.source {
        config.sync.source = Some(source.clone());
    }
    if let Some(replica) = &cli.replica {
        config.sync.replica = Some(replica.clone());
    }
    if let Some(interval) = cli.interval {
        config.sync.interval_secs = interval;
    }
    if let Some(log_file) = &cli.log_file {
        config.logging.file.clone_from(log_file);
    }
    if cli.dry_run {
        config.sync.dry_run = true;
    }
    if let Some(compare) = cli.compare {
        config.sync.compare = compare;
    }
    if let Some(symlinks) = cli.symlinks {
        config.sync.symlinks = symlinks;
    }
    if let Some(special_files) = cli.special_files {
        config.sync.special_files = special_files;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    if cli.no_console {
        config.logging.console = false;
    }
}
