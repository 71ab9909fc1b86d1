//! Job payload and engine configuration.
//!
//! `JobPayload` is the ingress contract: a caller-supplied strategy
//! definition, parsed straight off the wire with `serde`. `EngineConfig`
//! is an explicit value threaded through the loader and metrics stages
//! instead of read from ambient global state.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::predicate::Predicate;

/// Where a deal's take-profit trigger is recomputed from on every safety
/// order fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TakeProfitType {
    /// `avg_price * (1 + target_profit)`, recomputed whenever the average
    /// entry price moves (every safety-order fill).
    PercentageTotal,
    /// `base_entry_price * (1 + target_profit)`, fixed at deal open.
    PercentageBase,
}

/// The full strategy definition for one backtest job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub strategy_name: String,

    // Universe
    pub pairs: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,

    // Capital
    pub initial_balance: f64,
    pub base_order_size: f64,
    /// Given as a percent (e.g. `0.1` for 0.1%); divided by 100 internally.
    pub trading_fee: f64,
    /// Given 0..100; divided by 100 internally.
    pub reinvest_profit: f64,
    /// Given 0..100; divided by 100 internally.
    pub risk_reduction: f64,

    // Deal caps
    pub max_active_deals: u32,
    pub cooldown_between_deals: i64,
    pub min_daily_volume: f64,

    // Predicate lists
    #[serde(default)]
    pub entry_conditions: Vec<Predicate>,
    #[serde(default)]
    pub exit_conditions: Vec<Predicate>,
    #[serde(default)]
    pub exit_active: bool,
    #[serde(default)]
    pub safety_order_conditions: Vec<Predicate>,

    // Safety orders
    #[serde(default)]
    pub safety_order_toggle: bool,
    #[serde(default)]
    pub safety_order_size: f64,
    #[serde(default)]
    pub price_deviation: f64,
    #[serde(default)]
    pub max_safety_orders_count: u32,
    #[serde(default = "one")]
    pub safety_order_volume_scale: f64,
    #[serde(default = "one")]
    pub safety_order_step_scale: f64,

    // Risk
    #[serde(default)]
    pub stop_loss_toggle: bool,
    #[serde(default)]
    pub stop_loss_value: f64,
    #[serde(default)]
    pub stop_loss_timeout: i64,
    #[serde(default)]
    pub target_profit: f64,
    #[serde(default = "default_tp_type")]
    pub take_profit_type: TakeProfitType,
    #[serde(default)]
    pub price_change_active: bool,
    #[serde(default)]
    pub minprof_toggle: bool,
    #[serde(default)]
    pub minimal_profit: f64,
    /// Minutes; `0` disables the timeout exit.
    #[serde(default)]
    pub close_deal_after_timeout: i64,
    /// Reserved — not yet implemented by the kernel.
    #[serde(default)]
    pub trailing_toggle: bool,
    #[serde(default)]
    pub trailing_deviation: f64,
}

fn one() -> f64 {
    1.0
}

fn default_tp_type() -> TakeProfitType {
    TakeProfitType::PercentageTotal
}

impl JobPayload {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("failed to read job payload file")?;
        let payload: JobPayload = serde_json::from_str(&contents).context("failed to parse job payload JSON")?;
        Ok(payload)
    }

    pub fn fee_fraction(&self) -> f64 {
        self.trading_fee / 100.0
    }

    pub fn reinvest_fraction(&self) -> f64 {
        self.reinvest_profit / 100.0
    }

    pub fn risk_reduction_fraction(&self) -> f64 {
        self.risk_reduction / 100.0
    }
}

/// Ambient, non-strategy configuration for one engine invocation: where to
/// read indicator tables, where to write results, and how much
/// parallelism/time the job is allowed.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub results_dir: PathBuf,
    /// Bounded worker count for the Data Loader (default 4).
    pub data_loader_workers: usize,
    /// Reference instrument for the Benchmark Overlay. `None` resolves to
    /// the alphabetically-first pair in the job's universe.
    pub benchmark_symbol: Option<String>,
    /// Cooperative wall-clock budget for the whole job; checked at bar
    /// boundaries in the kernel, never mid-bar.
    pub wall_clock_budget: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            data_dir: PathBuf::from("data"),
            results_dir: PathBuf::from("data/backtest_results"),
            data_loader_workers: 4,
            benchmark_symbol: None,
            wall_clock_budget: None,
        }
    }
}

impl EngineConfig {
    /// Path convention for an instrument's indicator table:
    /// `<DATA_DIR>/<SYMBOL>_all_tf_merged.<ext>` with `/` replaced by `_`.
    pub fn instrument_path(&self, symbol: &str, ext: &str) -> PathBuf {
        let stem = symbol.replace('/', "_");
        self.data_dir.join(format!("{stem}_all_tf_merged.{ext}"))
    }

    pub fn results_dir_for(&self, strategy_name: &str) -> PathBuf {
        self.results_dir.join(strategy_name)
    }
}
