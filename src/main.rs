//! Command line entry point for the durability rig controller.
//!
//! ```bash
//! duratest --config experiment.json
//! RUST_LOG=duratest=debug duratest --config rig.toml --json-logs
//! duratest --dry-run            # full sequence against simulated instruments
//! ```

use anyhow::Context;
use clap::Parser;
use duratest::adapters::{Connector, MockConnector, SerialConnector};
use duratest::config::ExperimentConfig;
use duratest::events::TracingSink;
use duratest::experiment::{Experiment, ExperimentContext, Interrupt, RunReport};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Name of the run log written next to the output file.
const LOG_FILE_NAME: &str = "experiment.log";

#[derive(Parser, Debug)]
#[command(name = "duratest", version, about = "Unattended durability test controller")]
struct Cli {
    /// Experiment file (JSON or TOML)
    #[arg(short, long, default_value = "experiment.json")]
    config: PathBuf,

    /// Where to write the run log. Defaults to experiment.log beside the output file.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Emit JSON log lines on stderr
    #[arg(long)]
    json_logs: bool,

    /// Run against simulated instruments instead of the serial ports
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<bool> {
    let cli = Cli::parse();

    let config = ExperimentConfig::load_from(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    let log_file = cli
        .log_file
        .clone()
        .unwrap_or_else(|| default_log_path(&config.output_path));
    init_logging(&log_file, cli.json_logs)?;
    info!(config = %cli.config.display(), log = %log_file.display(), "duratest starting");

    let connector: Arc<dyn Connector> = if cli.dry_run {
        warn!("dry run: using simulated instruments");
        Arc::new(MockConnector::nominal(&config))
    } else {
        Arc::new(SerialConnector)
    };

    let context = ExperimentContext::new(config, connector, Arc::new(TracingSink))?;

    let (handle, interrupt) = Interrupt::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt requested, stopping at the next safe point");
            handle.request();
        }
    });

    let report = Experiment::with_csv_output(context).execute(interrupt).await;
    summarize(&report);
    Ok(report.is_success())
}

fn default_log_path(output_path: &Path) -> PathBuf {
    match output_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(LOG_FILE_NAME),
        _ => PathBuf::from(LOG_FILE_NAME),
    }
}

/// Human-readable (or JSON) stderr plus a plain-text run log file, both
/// filtered by `RUST_LOG` with `info` as the default.
fn init_logging(log_file: &Path, json: bool) -> anyhow::Result<()> {
    if let Some(dir) = log_file.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("failed to open {}", log_file.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = if json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    };
    let file_layer = fmt::layer().with_ansi(false).with_writer(Mutex::new(file));

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("failed to initialize logging")?;
    Ok(())
}

fn summarize(report: &RunReport) {
    match &report.result {
        Ok(()) => info!(
            state = ?report.state,
            rounds = report.rounds,
            starting_voltage = ?report.starting_voltage,
            "run complete"
        ),
        Err(err) => error!(
            state = ?report.state,
            rounds = report.rounds,
            error = %err,
            "run failed"
        ),
    }

    for failure in report.teardown.failures() {
        warn!(device = %failure.device, reason = %failure.reason, "device may not be in a safe state");
    }
}
