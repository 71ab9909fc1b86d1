//! Metrics: aggregate performance statistics computed once over the
//! Accountant's ledger, plus the `Outcome` enum that carries the three
//! success-shaped non-failure job results (`EmptyAfterFilter`, `NoTrades`,
//! `EarlyStop`) alongside the normal `Completed` result.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Serialize, Serializer};
use statrs::statistics::{Data, Distribution, OrderStatistics};

use crate::types::{LedgerRow, Symbol};

/// Profit factor, tagged rather than a literal `"Infinity"` string
/// sentinel. `Unbounded` serializes to the string `"Infinity"` to match
/// the wire format existing consumers expect; `Finite` serializes as a
/// plain number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProfitFactor {
    Finite(f64),
    /// Some profit, zero losses.
    Unbounded,
    /// No trades at all.
    Undefined,
}

impl Serialize for ProfitFactor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ProfitFactor::Finite(v) => serializer.serialize_f64(*v),
            ProfitFactor::Unbounded => serializer.serialize_str("Infinity"),
            ProfitFactor::Undefined => serializer.serialize_f64(1.0),
        }
    }
}

/// Deal duration summary, formatted as `"<d>d <h>h <m>m"`.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DurationStats {
    pub max_minutes: i64,
    pub avg_minutes: f64,
}

impl DurationStats {
    pub fn max_formatted(&self) -> String {
        format_minutes(self.max_minutes)
    }

    pub fn avg_formatted(&self) -> String {
        format_minutes(self.avg_minutes.round() as i64)
    }
}

fn format_minutes(total: i64) -> String {
    let days = total / (24 * 60);
    let hours = (total % (24 * 60)) / 60;
    let minutes = total % 60;
    format!("{days}d {hours}h {minutes}m")
}

/// Aggregate performance statistics, computed once over the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct Metrics {
    pub net_profit: f64,
    pub total_profit: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub profit_factor: ProfitFactor,
    pub win_rate: f64,
    pub num_trades: usize,
    pub num_wins: usize,
    pub num_losses: usize,
    pub avg_profit_per_trade: f64,
    /// Average win ÷ average loss magnitude; `f64::INFINITY` with no losses.
    pub risk_reward_ratio: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub total_realized_loss: f64,
    pub exposure_fraction: f64,
    pub var95: f64,
    pub yearly_return: f64,
    pub max_deal_duration_minutes: i64,
    pub avg_deal_duration_minutes: f64,
}

/// Success-shaped job outcomes: `ConfigError`/`DataMissingError` are true
/// failures and surface as `EngineError` instead (see `error.rs`);
/// everything here is a `Result::Ok` the caller must branch on by
/// variant.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The date filter produced no rows for any instrument.
    EmptyAfterFilter { message: String },
    /// Simulation produced zero events, or the Accountant skipped all of
    /// them (every trade over the admission cap).
    NoTrades { message: String },
    /// The wall-clock budget expired before the kernel finished; partial
    /// ledger/metrics are still reported.
    EarlyStop { message: String, ledger: Vec<LedgerRow>, metrics: Box<Metrics> },
    /// Normal completion.
    Completed { ledger: Vec<LedgerRow>, metrics: Box<Metrics> },
}

/// Resample `unrealized_balance` at 1-day last-value, forward-filled
/// across the full day range, mirroring pandas' `resample("1D").last()
/// .ffill()` convention without pulling in a dataframe crate for this one
/// pass.
fn daily_last_values(ledger: &[LedgerRow]) -> Vec<f64> {
    if ledger.is_empty() {
        return Vec::new();
    }
    let mut by_day: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for row in ledger {
        by_day.insert(row.timestamp.date_naive(), row.unrealized_balance);
    }

    let first = *by_day.keys().next().unwrap();
    let last = *by_day.keys().next_back().unwrap();
    let mut values = Vec::new();
    let mut last_seen = by_day[&first];
    let mut day = first;
    loop {
        if let Some(v) = by_day.get(&day) {
            last_seen = *v;
        }
        values.push(last_seen);
        if day >= last {
            break;
        }
        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    values
}

fn pct_changes(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .filter_map(|w| if w[0].abs() > 1e-12 { Some((w[1] - w[0]) / w[0]) } else { None })
        .collect()
}

/// Match entry/exit events by `trade_id` to compute per-deal durations.
fn deal_durations(ledger: &[LedgerRow]) -> Vec<i64> {
    let mut opened: HashMap<&str, DateTime<Utc>> = HashMap::new();
    let mut durations = Vec::new();
    for row in ledger {
        if row.trade_id.is_empty() {
            continue;
        }
        if row.action == "BUY" {
            opened.entry(&row.trade_id).or_insert(row.timestamp);
        } else if matches!(row.action.as_str(), "SELL" | "Stop Loss EXIT" | "Take Profit EXIT" | "Timeout EXIT") {
            if let Some(open_ts) = opened.remove(row.trade_id.as_str()) {
                durations.push((row.timestamp - open_ts).num_minutes());
            }
        }
    }
    durations
}

/// Fraction of elapsed wall-clock time any symbol held a nonzero position,
/// approximated from consecutive ledger timestamps weighted by whether
/// *any* symbol was held going into the gap.
fn exposure_fraction(ledger: &[LedgerRow]) -> f64 {
    if ledger.len() < 2 {
        return 0.0;
    }
    let mut held_minutes = 0i64;
    let mut total_minutes = 0i64;
    for window in ledger.windows(2) {
        let gap = (window[1].timestamp - window[0].timestamp).num_minutes().max(0);
        total_minutes += gap;
        if window[0].position_held > 0.0 {
            held_minutes += gap;
        }
    }
    if total_minutes == 0 {
        0.0
    } else {
        held_minutes as f64 / total_minutes as f64
    }
}

/// Compute the full `Metrics` block over a ledger. `initial_balance`
/// anchors `net_profit`; `yearly_return` annualizes off the ledger's own
/// first/last timestamp span (the actual data the kernel walked), falling
/// back to the job's `[start, end]` window only when the ledger doesn't
/// span at least two distinct timestamps.
pub fn compute(ledger: &[LedgerRow], initial_balance: f64, start: NaiveDate, end: NaiveDate) -> Metrics {
    let exits: Vec<&LedgerRow> = ledger
        .iter()
        .filter(|r| matches!(r.action.as_str(), "SELL" | "Stop Loss EXIT" | "Take Profit EXIT" | "Timeout EXIT"))
        .filter(|r| !r.trade_comment.contains("no-position exit"))
        .collect();

    let gross_profit: f64 = exits.iter().map(|r| r.profit_loss).filter(|&p| p > 0.0).sum();
    let gross_loss: f64 = exits.iter().map(|r| r.profit_loss).filter(|&p| p < 0.0).sum::<f64>().abs();
    let num_wins = exits.iter().filter(|r| r.profit_loss > 0.0).count();
    let num_losses = exits.iter().filter(|r| r.profit_loss < 0.0).count();
    let num_trades = exits.len();

    let profit_factor = if num_trades == 0 {
        ProfitFactor::Undefined
    } else if gross_loss < 1e-12 {
        if gross_profit > 0.0 {
            ProfitFactor::Unbounded
        } else {
            ProfitFactor::Undefined
        }
    } else {
        ProfitFactor::Finite(gross_profit / gross_loss)
    };

    let win_rate = if num_trades > 0 { num_wins as f64 / num_trades as f64 } else { 0.0 };
    let total_pnl: f64 = exits.iter().map(|r| r.profit_loss).sum();
    let avg_profit_per_trade = if num_trades > 0 { total_pnl / num_trades as f64 } else { 0.0 };

    let avg_win = if num_wins > 0 { gross_profit / num_wins as f64 } else { 0.0 };
    let avg_loss = if num_losses > 0 { gross_loss / num_losses as f64 } else { 0.0 };
    let risk_reward_ratio = if num_losses == 0 { f64::INFINITY } else { avg_win / avg_loss };

    let real_balance_final = ledger.last().map(|r| r.real_balance).unwrap_or(initial_balance);
    let unrealized_final = ledger.last().map(|r| r.unrealized_balance).unwrap_or(initial_balance);
    let net_profit = if initial_balance > 1e-12 { (real_balance_final - initial_balance) / initial_balance } else { 0.0 };
    let total_profit = if initial_balance > 1e-12 { (unrealized_final - initial_balance) / initial_balance } else { 0.0 };

    let daily = daily_last_values(ledger);
    let returns = pct_changes(&daily);
    let (sharpe, sortino, var95) = if returns.len() >= 2 {
        let mut data = Data::new(returns.clone());
        let mean = data.mean().unwrap_or(0.0);
        let std = data.std_dev().unwrap_or(0.0);
        let sharpe = if std > 1e-12 { mean / std * 252f64.sqrt() } else { 0.0 };

        let negative: Vec<f64> = returns.iter().copied().filter(|&r| r < 0.0).collect();
        let sortino = if negative.len() >= 2 {
            let mut neg_data = Data::new(negative);
            let down_std = neg_data.std_dev().unwrap_or(0.0);
            if down_std > 1e-12 { mean / down_std * 252f64.sqrt() } else { 0.0 }
        } else {
            0.0
        };

        let var95 = -data.quantile(0.05);
        (sharpe, sortino, var95)
    } else {
        (0.0, 0.0, 0.0)
    };

    // Annualize off the ledger's own timestamp span in minutes, not the
    // requested `[start, end]` window — a universe whose data doesn't
    // cover the full requested range must not be annualized as if it did.
    // Falls back to the requested window only when the ledger doesn't span
    // at least two distinct timestamps.
    let span_minutes = match (ledger.first(), ledger.last()) {
        (Some(first), Some(last)) if last.timestamp > first.timestamp => {
            (last.timestamp - first.timestamp).num_minutes() as f64
        }
        _ => (end - start).num_days() as f64 * 1440.0,
    };
    let years = (span_minutes / 525_600.0).max(1.0 / 525_600.0);
    let yearly_return = (1.0 + net_profit).powf(1.0 / years) - 1.0;

    let durations = deal_durations(ledger);
    let max_deal_duration_minutes = durations.iter().copied().max().unwrap_or(0);
    let avg_deal_duration_minutes =
        if durations.is_empty() { 0.0 } else { durations.iter().sum::<i64>() as f64 / durations.len() as f64 };

    Metrics {
        net_profit,
        total_profit,
        sharpe,
        sortino,
        profit_factor,
        win_rate,
        num_trades,
        num_wins,
        num_losses,
        avg_profit_per_trade,
        risk_reward_ratio,
        gross_profit,
        gross_loss,
        total_realized_loss: gross_loss,
        exposure_fraction: exposure_fraction(ledger),
        var95,
        yearly_return,
        max_deal_duration_minutes,
        avg_deal_duration_minutes,
    }
}

/// Per-symbol position map is not tracked here; this helper exists so
/// callers (the orchestrator) don't need to reach into `LedgerRow`
/// directly to find the set of symbols a ledger touched.
pub fn symbols_in_ledger(ledger: &[LedgerRow]) -> Vec<Symbol> {
    let mut seen = std::collections::BTreeSet::new();
    for row in ledger {
        seen.insert(row.symbol.clone());
    }
    seen.into_iter().map(Symbol::new).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(ts: DateTime<Utc>, action: &str, profit_loss: f64, unrealized: f64, trade_id: &str) -> LedgerRow {
        LedgerRow {
            timestamp: ts,
            symbol: "AAA".into(),
            action: action.to_string(),
            price: 100.0,
            trade_comment: String::new(),
            trade_id: trade_id.to_string(),
            position: 0.0,
            order_size: 0.0,
            trade_size: 0.0,
            profit_loss,
            balance: 10_000.0,
            real_balance: 10_000.0 + profit_loss,
            free_cash: 10_000.0,
            position_change: 0.0,
            position_held: 0.0,
            unrealized_balance: unrealized,
            drawdown: 0.0,
            max_drawdown: 0.0,
            realized_drawdown: 0.0,
            max_realized_drawdown: 0.0,
        }
    }

    #[test]
    fn profit_factor_is_undefined_with_no_trades() {
        let metrics = compute(&[], 10_000.0, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(metrics.profit_factor, ProfitFactor::Undefined);
    }

    #[test]
    fn profit_factor_is_unbounded_with_profit_and_no_losses() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let ledger = vec![row(t0, "BUY", 0.0, 10_000.0, "1"), row(t0, "SELL", 50.0, 10_050.0, "1")];
        let metrics = compute(&ledger, 10_000.0, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(metrics.profit_factor, ProfitFactor::Unbounded);
    }

    #[test]
    fn win_rate_counts_only_real_exits() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut audit = row(t0, "SELL", 0.0, 10_000.0, "9");
        audit.trade_comment = "no-position exit, audit only".into();
        let ledger = vec![row(t0, "BUY", 0.0, 10_000.0, "1"), row(t0, "SELL", 10.0, 10_010.0, "1"), audit];
        let metrics = compute(&ledger, 10_000.0, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(metrics.num_trades, 1);
        assert_eq!(metrics.win_rate, 1.0);
    }
}
