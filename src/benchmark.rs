//! Benchmark Overlay: a buy-and-hold comparison curve for a reference
//! instrument, re-indexed onto the ledger's own timeline.
//!
//! The reference instrument's minute-resolution close series is loaded
//! independently of the job's own universe (it does not need to satisfy
//! the job's predicate schema at all — only `close` is required), forward-
//! filled, scaled into an equity curve starting from `initial_balance`,
//! and left-joined onto the ledger's timestamps.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::types::{LedgerRow, Schema};

/// One point of the buy-and-hold overlay, aligned to a ledger timestamp.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct BenchmarkPoint {
    pub timestamp: DateTime<Utc>,
    pub balance: f64,
}

/// Build the buy-and-hold overlay for `reference_symbol` across
/// `ledger_timestamps`, scaled from `initial_balance`. Loads the
/// reference instrument's own table (base OHLCV only — no indicator
/// schema needed) via the Data Loader, independent of the job's universe.
pub fn build(
    cfg: &EngineConfig,
    reference_symbol: &str,
    ledger_timestamps: &[DateTime<Utc>],
    initial_balance: f64,
    start: chrono::NaiveDate,
    end: chrono::NaiveDate,
) -> EngineResult<Vec<BenchmarkPoint>> {
    if ledger_timestamps.is_empty() {
        return Ok(Vec::new());
    }

    let empty_schema = Schema::new(vec![]);
    let rows = crate::data::load_instrument(cfg, reference_symbol, &empty_schema, start, end)?;
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    // Forward-filled close series keyed by timestamp, mirroring the
    // Metrics module's daily-resample approach but at native resolution.
    let mut closes: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();
    for row in &rows {
        closes.insert(row.timestamp, row.close);
    }

    let first_close = rows[0].close;
    let shares = if first_close > 1e-12 { initial_balance / first_close } else { 0.0 };

    let mut points = Vec::with_capacity(ledger_timestamps.len());
    let mut last_close = first_close;
    for &ts in ledger_timestamps {
        if let Some((_, &close_at_or_before)) = closes.range(..=ts).next_back() {
            last_close = close_at_or_before;
        }
        points.push(BenchmarkPoint { timestamp: ts, balance: shares * last_close });
    }
    Ok(points)
}

/// Convenience: derive the sorted, deduplicated timestamp axis the
/// overlay should be aligned to from a ledger.
pub fn timestamps_of(ledger: &[LedgerRow]) -> Vec<DateTime<Utc>> {
    let mut ts: Vec<DateTime<Utc>> = ledger.iter().map(|r| r.timestamp).collect();
    ts.sort();
    ts.dedup();
    ts
}
