//! `dca-backtest`: a thin local/manual entry point over the engine.
//!
//! The production surface for this crate is the `run_backtest` library
//! call — an HTTP API or job-queue worker embeds it directly; this binary
//! exists only so a job payload can be run from a shell without writing a
//! wrapper program.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dca_backtest_engine::config::JobPayload;
use dca_backtest_engine::{engine, EngineConfig};

#[derive(Parser, Debug)]
#[command(name = "dca-backtest")]
#[command(about = "Event-driven backtesting engine for rule-based DCA trading strategies", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one backtest job from a JSON payload file
    Run {
        /// Path to the job payload (`JobPayload` JSON)
        #[arg(long)]
        job: PathBuf,

        /// Directory holding `<SYMBOL>_all_tf_merged.{parquet,csv}` tables
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        /// Directory backtest_results CSVs are written under
        #[arg(long, default_value = "data/backtest_results")]
        results_dir: PathBuf,

        /// Reference instrument for the buy-and-hold overlay; defaults to
        /// the alphabetically-first pair in the job's universe
        #[arg(long)]
        benchmark_symbol: Option<String>,

        /// Wall-clock budget for the job, in seconds; unset means unbounded
        #[arg(long)]
        budget_secs: Option<u64>,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let log_filename = format!("{}_{}.log", command_name, chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"));
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!("{level},polars=warn");
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry().with(env_filter).with(console_layer).with(file_layer).init();

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, "backtest")?;

    match cli.command {
        Commands::Run { job, data_dir, results_dir, benchmark_symbol, budget_secs } => {
            let payload = JobPayload::from_file(&job).context("failed to load job payload")?;
            let cfg = EngineConfig {
                data_dir,
                results_dir,
                benchmark_symbol,
                ..EngineConfig::default()
            };
            let deadline = budget_secs.map(|secs| Instant::now() + Duration::from_secs(secs));

            let outcome = engine::run_backtest(&payload, &cfg, deadline).context("backtest job failed")?;
            let result = engine::to_job_result(outcome, &payload, &cfg);

            match &result.status {
                dca_backtest_engine::JobStatus::Success => info!(message = %result.message, trades = result.df_out.len(), "job finished"),
                dca_backtest_engine::JobStatus::Error => tracing::error!(message = %result.message, "job finished with error"),
            }
            if let Some(metrics) = &result.metrics {
                println!("{}", serde_json::to_string_pretty(metrics)?);
            } else {
                println!("{}", result.message);
            }
            Ok(())
        }
    }
}
