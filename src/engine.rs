//! The top-level orchestrator: wires the Schema Resolver, Data Loader,
//! Simulation Kernel, Admission Controller (invoked from inside the
//! kernel), Accountant, Metrics, and Benchmark Overlay into one
//! `run_backtest` call, and writes the CSV side effects.
//!
//! This is the one function external callers (an HTTP API or job-queue
//! worker, out of scope for this crate) embed; there is no CLI surface in
//! the core, the `backtest` binary in `main.rs` is a thin wrapper for
//! local/manual runs only.

use std::fs;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{EngineConfig, JobPayload};
use crate::error::{EngineError, EngineResult};
use crate::metrics::{self, Metrics, Outcome};
use crate::types::LedgerRow;
use crate::{accountant, benchmark, data, kernel, schema};

/// Buy-and-hold overlay plus the unrealized-balance/drawdown series,
/// aligned to the ledger's own timeline.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChartData {
    pub timestamps: Vec<DateTime<Utc>>,
    pub unrealized_balance: Vec<f64>,
    pub bh_timestamps: Vec<DateTime<Utc>>,
    pub bh_balance: Vec<f64>,
    pub drawdown: Vec<f64>,
}

/// Realized-cash/drawdown series.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChartDataRealized {
    pub timestamps: Vec<DateTime<Utc>>,
    pub real_balance: Vec<f64>,
    pub realized_drawdown: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Error,
}

/// The egress contract: always `status` + `message`; the rest are
/// populated only when the job actually produced a ledger.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub status: JobStatus,
    pub message: String,
    pub metrics: Option<Metrics>,
    pub chart_data: Option<ChartData>,
    pub chart_data_realized: Option<ChartDataRealized>,
    pub df_out: Vec<LedgerRow>,
}

impl JobResult {
    fn empty_success(message: impl Into<String>) -> Self {
        JobResult {
            status: JobStatus::Success,
            message: message.into(),
            metrics: None,
            chart_data: None,
            chart_data_realized: None,
            df_out: Vec::new(),
        }
    }
}

/// Run one backtest job end to end: resolve the schema, load the
/// universe, simulate, account, and compute metrics. `deadline` is the
/// cooperative wall-clock budget; `None` means unbounded.
///
/// Returns `Err` only for the two terminal failure kinds (`ConfigError`,
/// `DataMissingError`); every other outcome, including "no data after
/// filtering" and "no trades generated", is a `Result::Ok` carrying the
/// matching `Outcome` variant.
pub fn run_backtest(payload: &JobPayload, cfg: &EngineConfig, deadline: Option<Instant>) -> EngineResult<Outcome> {
    if payload.pairs.is_empty() {
        return Err(EngineError::Config("job payload has an empty pairs list".to_string()));
    }
    if payload.end_date < payload.start_date {
        return Err(EngineError::Config(format!(
            "end_date {} precedes start_date {}",
            payload.end_date, payload.start_date
        )));
    }

    info!(strategy = %payload.strategy_name, pairs = ?payload.pairs, "starting backtest job");

    let safety_sources = std::slice::from_ref(&payload.safety_order_conditions);
    let resolved_schema = schema::resolve(&schema::PredicateSources {
        entry: &payload.entry_conditions,
        safety_orders: safety_sources,
        exit: &payload.exit_conditions,
    });

    let per_instrument = data::load_universe(cfg, &payload.pairs, &resolved_schema, payload.start_date, payload.end_date)?;
    let rows = data::merge_sorted(per_instrument);

    if rows.is_empty() {
        warn!("no rows survived date filtering for any instrument in this job's universe");
        return Ok(Outcome::EmptyAfterFilter { message: "No data after filtering dates.".to_string() });
    }

    let kernel_output = kernel::run_with_deadline(payload, &resolved_schema, &rows, deadline);
    info!(
        events = kernel_output.events.len(),
        timed_out = kernel_output.timed_out,
        "simulation kernel pass complete"
    );

    if kernel_output.events.is_empty() {
        return Ok(Outcome::NoTrades { message: "No trades generated".to_string() });
    }

    let ledger = accountant::run(payload, &kernel_output.events);
    let any_admitted = ledger.iter().any(|row| row.action == "BUY" && row.order_size > 1e-12);
    if !any_admitted {
        // Every entry event was either a heartbeat or skipped by the
        // accountant for exceeding the admission cap.
        return Ok(Outcome::NoTrades { message: "No trades generated".to_string() });
    }

    let computed = metrics::compute(&ledger, payload.initial_balance, payload.start_date, payload.end_date);

    if kernel_output.timed_out {
        return Ok(Outcome::EarlyStop {
            message: "Job stopped early: wall-clock budget exceeded".to_string(),
            ledger,
            metrics: Box::new(computed),
        });
    }

    Ok(Outcome::Completed { ledger, metrics: Box::new(computed) })
}

/// Turn an `Outcome` into the wire-shaped `JobResult`, building the chart
/// overlays and writing the CSV side effects for outcomes that
/// carry a ledger. Benchmark-overlay load failures are logged and
/// degrade to an empty overlay rather than failing the whole job — a
/// missing reference instrument shouldn't sink an otherwise-successful
/// backtest.
pub fn to_job_result(outcome: Outcome, payload: &JobPayload, cfg: &EngineConfig) -> JobResult {
    match outcome {
        Outcome::EmptyAfterFilter { message } | Outcome::NoTrades { message } => JobResult::empty_success(message),
        Outcome::EarlyStop { message, ledger, metrics } => build_job_result(message, ledger, *metrics, payload, cfg),
        Outcome::Completed { ledger, metrics } => {
            build_job_result("Backtest completed".to_string(), ledger, *metrics, payload, cfg)
        }
    }
}

fn build_job_result(message: String, ledger: Vec<LedgerRow>, computed: Metrics, payload: &JobPayload, cfg: &EngineConfig) -> JobResult {
    let ledger_ts = benchmark::timestamps_of(&ledger);
    let reference_symbol = cfg.benchmark_symbol.clone().unwrap_or_else(|| {
        payload.pairs.iter().min().cloned().unwrap_or_default()
    });
    let bh_points = benchmark::build(cfg, &reference_symbol, &ledger_ts, payload.initial_balance, payload.start_date, payload.end_date)
        .unwrap_or_else(|err| {
            warn!(reference_symbol, error = %err, "benchmark overlay unavailable, continuing without it");
            Vec::new()
        });

    let chart_data = ChartData {
        timestamps: ledger.iter().map(|r| r.timestamp).collect(),
        unrealized_balance: ledger.iter().map(|r| r.unrealized_balance).collect(),
        bh_timestamps: bh_points.iter().map(|p| p.timestamp).collect(),
        bh_balance: bh_points.iter().map(|p| p.balance).collect(),
        drawdown: ledger.iter().map(|r| r.drawdown).collect(),
    };
    let chart_data_realized = ChartDataRealized {
        timestamps: ledger.iter().map(|r| r.timestamp).collect(),
        real_balance: ledger.iter().map(|r| r.real_balance).collect(),
        realized_drawdown: ledger.iter().map(|r| r.realized_drawdown).collect(),
    };

    if let Err(err) = write_results(cfg, payload, &ledger, &computed) {
        warn!(error = %err, "failed to write backtest_results CSV side effects");
    }

    JobResult {
        status: JobStatus::Success,
        message,
        metrics: Some(computed),
        chart_data: Some(chart_data),
        chart_data_realized: Some(chart_data_realized),
        df_out: ledger,
    }
}

/// Write `df_out` and a one-row summary CSV under
/// `<DATA_DIR>/backtest_results/<strategy_name>/`.
fn write_results(cfg: &EngineConfig, payload: &JobPayload, ledger: &[LedgerRow], computed: &Metrics) -> EngineResult<()> {
    let out_dir = cfg.results_dir_for(&payload.strategy_name);
    fs::create_dir_all(&out_dir)?;

    let ledger_path = out_dir.join("ledger.csv");
    let mut ledger_writer = csv::Writer::from_path(&ledger_path).map_err(|e| EngineError::Columnar(e.to_string()))?;
    for row in ledger {
        ledger_writer.serialize(row).map_err(|e| EngineError::Columnar(e.to_string()))?;
    }
    ledger_writer.flush()?;

    let summary_path = out_dir.join("summary.csv");
    let mut summary_writer = csv::Writer::from_path(&summary_path).map_err(|e| EngineError::Columnar(e.to_string()))?;
    summary_writer.serialize(computed).map_err(|e| EngineError::Columnar(e.to_string()))?;
    summary_writer.flush()?;

    info!(path = %out_dir.display(), "wrote backtest_results CSVs");
    Ok(())
}
