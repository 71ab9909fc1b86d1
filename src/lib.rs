//! Event-driven backtesting engine for rule-based DCA trading strategies.
//!
//! A job payload describes a strategy (entry/exit/safety-order predicates,
//! risk parameters, universe and date range); the engine replays the
//! instrument universe bar-by-bar through the Simulation Kernel, re-passes
//! the resulting trade stream through the Accountant for compounding and
//! drawdown bookkeeping, and reports final metrics plus a benchmark
//! overlay.

pub mod accountant;
pub mod admission;
pub mod benchmark;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod kernel;
pub mod metrics;
pub mod predicate;
pub mod risk;
pub mod schema;
pub mod types;

pub use config::{EngineConfig, JobPayload};
pub use engine::{run_backtest, to_job_result, ChartData, ChartDataRealized, JobResult, JobStatus};
pub use error::{EngineError, EngineResult};
pub use metrics::{Metrics, Outcome, ProfitFactor};
pub use types::*;
