//! Core data types shared across the simulation pipeline.
//!
//! `BarRow` is the hot-loop representation of one OHLCV bar: fixed OHLCV
//! fields plus a schema-indexed slab of optional indicator values, via a
//! column-name → integer-offset mapping computed once per job instead of
//! dynamic, string-keyed row access.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Trading pair / instrument identifier, e.g. "BTC/USDT".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Symbol(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The filesystem-safe form used in indicator store paths: `/` → `_`.
    pub fn file_stem(&self) -> String {
        self.0.replace('/', "_")
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timeframe tag referenced by a predicate. The base timeframe (the one the
/// job's own bars are sampled at — typically "1h" for an equities universe,
/// "1m" for a crypto universe) never carries a `_<t>` column suffix; every
/// other timeframe does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl Timeframe {
    /// Column-name suffix for this timeframe, e.g. `_5m`.
    pub fn suffix(self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    /// Number of minutes in one bar of this timeframe, used only to rank
    /// timeframes against one another.
    pub fn minutes(self) -> u32 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Timeframe::M1),
            "5m" => Some(Timeframe::M5),
            "15m" => Some(Timeframe::M15),
            "1h" => Some(Timeframe::H1),
            "4h" => Some(Timeframe::H4),
            "1d" => Some(Timeframe::D1),
            _ => None,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.suffix())
    }
}

/// Column-name → offset mapping for a job's resolved indicator columns.
/// Built once by the Schema Resolver and shared (by reference) through the
/// loader, the predicate evaluator, and the kernel.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    columns: Vec<String>,
    index: HashMap<String, usize>,
}

impl Schema {
    pub fn new(mut columns: Vec<String>) -> Self {
        columns.sort();
        columns.dedup();
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i))
            .collect();
        Schema { columns, index }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// One OHLCV bar for one instrument, plus the schema-indexed extra columns
/// (indicator values, per-timeframe close mirrors, bar-close flags).
///
/// Invariant: for every predicate referencing timeframe `t`, the predicate
/// only evaluates on rows where `Bar_Close_<t>` is true/non-null;
/// otherwise it fails. Missing optional columns are `None`, never a fault.
#[derive(Debug, Clone)]
pub struct BarRow {
    pub timestamp: DateTime<Utc>,
    pub symbol: Symbol,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// `volume * close`, summed per calendar day by the Data Loader.
    pub daily_vol_usdt: f64,
    /// Schema-indexed extra columns, parallel to `Schema::columns`.
    pub extra: Vec<Option<f64>>,
}

impl BarRow {
    pub fn get(&self, schema: &Schema, column: &str) -> Option<f64> {
        schema
            .column_index(column)
            .and_then(|idx| self.extra.get(idx).copied().flatten())
    }

    pub fn get_at(&self, index: usize) -> Option<f64> {
        self.extra.get(index).copied().flatten()
    }

    /// `close_<t>` for a non-base timeframe, or this bar's own `close` when
    /// `tf` is `None` (meaning: the job's base timeframe).
    pub fn close_for(&self, schema: &Schema, tf: Option<Timeframe>) -> Option<f64> {
        match tf {
            None => Some(self.close),
            Some(t) => self.get(schema, &format!("close_{}", t.suffix())),
        }
    }

    /// Bar-close gate for timeframe `t`: `true` for the base timeframe
    /// (every bar is a bar-close at its own native sampling rate), otherwise
    /// the value of `Bar_Close_<t>`, defaulting to `false` when absent.
    pub fn bar_close(&self, schema: &Schema, tf: Option<Timeframe>) -> bool {
        match tf {
            None => true,
            Some(t) => self
                .get(schema, &format!("Bar_Close_{}", t.suffix()))
                .map(|v| v != 0.0)
                .unwrap_or(false),
        }
    }
}

/// TradingView-rating synonym classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TvRating {
    StrongBuy,
    Buy,
    Neutral,
    Sell,
    StrongSell,
}

impl TvRating {
    /// A row labelled `self` satisfies a predicate asking for `wanted`.
    /// "Buy" matches {Buy, Strong Buy}; "Strong Buy" is strict, and so on
    /// symmetrically for the sell side; "Neutral" only matches itself.
    pub fn matches(self, wanted: TvRating) -> bool {
        match wanted {
            TvRating::Buy => matches!(self, TvRating::Buy | TvRating::StrongBuy),
            TvRating::Sell => matches!(self, TvRating::Sell | TvRating::StrongSell),
            other => self == other,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Strong Buy" => Some(TvRating::StrongBuy),
            "Buy" => Some(TvRating::Buy),
            "Neutral" => Some(TvRating::Neutral),
            "Sell" => Some(TvRating::Sell),
            "Strong Sell" => Some(TvRating::StrongSell),
            _ => None,
        }
    }
}

/// One open long position in one instrument.
#[derive(Debug, Clone)]
pub struct Deal {
    pub trade_id: String,
    pub entry_price: f64,
    pub quantity: f64,
    /// Sum of base order plus all filled safety orders, pre-fee basis.
    pub total_cost: f64,
    pub placed_so_count: u32,
    pub last_so_price: f64,
    pub last_so_size: f64,
    pub so_dev_factor: f64,
    pub next_so_trigger_price: Option<f64>,
    pub stop_loss_trigger: Option<f64>,
    pub take_profit_trigger: Option<f64>,
    pub time_opened: DateTime<Utc>,
}

impl Deal {
    pub fn avg_price(&self) -> f64 {
        if self.quantity > 1e-12 {
            self.total_cost / self.quantity
        } else {
            0.0
        }
    }
}

/// A single action recorded by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeAction {
    Buy,
    SafetyOrder(u32),
    Sell,
    StopLossExit,
    TakeProfitExit,
    TimeoutExit,
    HourCheck,
}

impl TradeAction {
    pub fn is_entry(self) -> bool {
        matches!(self, TradeAction::Buy | TradeAction::SafetyOrder(_))
    }

    pub fn is_exit(self) -> bool {
        matches!(
            self,
            TradeAction::Sell
                | TradeAction::StopLossExit
                | TradeAction::TakeProfitExit
                | TradeAction::TimeoutExit
        )
    }

    pub fn is_hour_check(self) -> bool {
        matches!(self, TradeAction::HourCheck)
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeAction::Buy => write!(f, "BUY"),
            TradeAction::SafetyOrder(n) => write!(f, "Safety Order #{n}"),
            TradeAction::Sell => write!(f, "SELL"),
            TradeAction::StopLossExit => write!(f, "Stop Loss EXIT"),
            TradeAction::TakeProfitExit => write!(f, "Take Profit EXIT"),
            TradeAction::TimeoutExit => write!(f, "Timeout EXIT"),
            TradeAction::HourCheck => write!(f, "HOUR CHECK"),
        }
    }
}

/// Append-only record produced by the Simulation Kernel.
#[derive(Debug, Clone)]
pub struct TradeEvent {
    pub timestamp: DateTime<Utc>,
    pub symbol: Symbol,
    pub action: TradeAction,
    pub price: f64,
    pub quantity: f64,
    pub amount: f64,
    pub total_amount: f64,
    pub profit_percent: Option<f64>,
    pub move_from_entry: f64,
    pub trade_comment: String,
    pub trade_id: String,
}

/// Second-pass output row produced by the Accountant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRow {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub action: String,
    pub price: f64,
    pub trade_comment: String,
    pub trade_id: String,
    pub position: f64,
    pub order_size: f64,
    pub trade_size: f64,
    pub profit_loss: f64,
    pub balance: f64,
    pub real_balance: f64,
    pub free_cash: f64,
    pub position_change: f64,
    pub position_held: f64,
    pub unrealized_balance: f64,
    pub drawdown: f64,
    pub max_drawdown: f64,
    pub realized_drawdown: f64,
    pub max_realized_drawdown: f64,
}
