//! End-to-end and property-level integration tests for the backtesting
//! pipeline: Schema Resolver -> Simulation Kernel -> Accountant -> Metrics.
//!
//! These exercise the pipeline at the in-memory layer (bars built with
//! `tests/support`, not files on disk) so they cover the deterministic
//! simulation core without needing a parquet/CSV fixture store; the Data
//! Loader itself is covered by `src/data.rs`'s own unit tests.

mod support;

use chrono::{NaiveDate, TimeZone, Utc};

use dca_backtest_engine::config::TakeProfitType;
use dca_backtest_engine::predicate::{IndicatorFamily, Predicate, ValueCheck};
use dca_backtest_engine::schema::{self, PredicateSources};
use dca_backtest_engine::{accountant, kernel, metrics, JobPayload, ProfitFactor, Schema, TradeAction};

fn base_payload() -> JobPayload {
    JobPayload {
        strategy_name: "integration".into(),
        pairs: vec!["AAA/USDT".into(), "BBB/USDT".into()],
        start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        initial_balance: 10_000.0,
        base_order_size: 1_000.0,
        trading_fee: 0.1,
        reinvest_profit: 50.0,
        risk_reduction: 25.0,
        max_active_deals: 1,
        cooldown_between_deals: 15,
        min_daily_volume: 0.0,
        entry_conditions: vec![],
        exit_conditions: vec![],
        exit_active: false,
        safety_order_conditions: vec![],
        safety_order_toggle: false,
        safety_order_size: 0.0,
        price_deviation: 0.0,
        max_safety_orders_count: 0,
        safety_order_volume_scale: 1.0,
        safety_order_step_scale: 1.0,
        stop_loss_toggle: false,
        stop_loss_value: 0.0,
        stop_loss_timeout: 0,
        target_profit: 2.0,
        take_profit_type: TakeProfitType::PercentageTotal,
        price_change_active: true,
        minprof_toggle: false,
        minimal_profit: 0.0,
        close_deal_after_timeout: 0,
        trailing_toggle: false,
        trailing_deviation: 0.0,
    }
}

fn rsi_entry(threshold: f64) -> Predicate {
    Predicate { family: IndicatorFamily::Rsi { length: 14, check: ValueCheck::LessThan(threshold) }, timeframe: None }
}

/// Build a two-symbol universe whose RSI dips below 30 at staggered times,
/// so both symbols' entry predicates fire but not at exactly the same bar.
fn two_symbol_universe(schema: &Schema) -> Vec<dca_backtest_engine::BarRow> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let n = 600;
    let closes_a: Vec<f64> = (0..n).map(|i| 100.0 + (i as f64 * 0.03).sin() * 6.0).collect();
    let closes_b: Vec<f64> = (0..n).map(|i| 50.0 + ((i as f64 + 40.0) * 0.03).sin() * 3.0).collect();

    let mut rows_a = support::flat_bars("AAA/USDT", &closes_a, schema, start);
    let mut rows_b = support::flat_bars("BBB/USDT", &closes_b, schema, start);

    let rsi_a = support::rsi_series(&closes_a, 14);
    let rsi_b = support::rsi_series(&closes_b, 14);
    support::attach_column(&mut rows_a, schema, "RSI_14", &rsi_a);
    support::attach_column(&mut rows_b, schema, "RSI_14", &rsi_b);

    let mut merged: Vec<_> = rows_a.into_iter().chain(rows_b).collect();
    merged.sort_by(|x, y| x.timestamp.cmp(&y.timestamp).then_with(|| x.symbol.cmp(&y.symbol)));
    merged
}

#[test]
fn full_pipeline_produces_a_consistent_ledger_and_metrics() {
    let mut payload = base_payload();
    payload.entry_conditions = vec![rsi_entry(35.0)];

    let schema = schema::resolve(&PredicateSources {
        entry: &payload.entry_conditions,
        safety_orders: &[],
        exit: &payload.exit_conditions,
    });
    let rows = two_symbol_universe(&schema);

    let kernel_output = kernel::run_with_deadline(&payload, &schema, &rows, None);
    assert!(!kernel_output.timed_out);
    assert!(!kernel_output.events.is_empty(), "RSI dips below 35 for both symbols over 600 bars");

    let ledger = accountant::run(&payload, &kernel_output.events);
    assert!(!ledger.is_empty());

    let computed = metrics::compute(&ledger, payload.initial_balance, payload.start_date, payload.end_date);
    assert!(computed.num_trades > 0);
    assert_ne!(computed.profit_factor, ProfitFactor::Undefined);
}

#[test]
fn deal_exclusivity_never_exceeds_max_active_deals() {
    let mut payload = base_payload();
    payload.max_active_deals = 1;
    payload.entry_conditions = vec![rsi_entry(40.0)];

    let schema = schema::resolve(&PredicateSources {
        entry: &payload.entry_conditions,
        safety_orders: &[],
        exit: &payload.exit_conditions,
    });
    let rows = two_symbol_universe(&schema);
    let events = kernel::run(&payload, &schema, &rows);
    let ledger = accountant::run(&payload, &events);

    let mut open: std::collections::HashSet<&str> = std::collections::HashSet::new();
    for row in &ledger {
        match row.action.as_str() {
            "BUY" => {
                open.insert(&row.trade_id);
                assert!(open.len() <= payload.max_active_deals as usize, "admission cap violated: {open:?}");
            }
            "SELL" | "Stop Loss EXIT" | "Take Profit EXIT" | "Timeout EXIT" => {
                open.remove(row.trade_id.as_str());
            }
            _ => {}
        }
    }
}

#[test]
fn ledger_accounting_reconciles_within_tolerance() {
    let mut payload = base_payload();
    payload.max_active_deals = 2;
    payload.entry_conditions = vec![rsi_entry(40.0)];

    let schema = schema::resolve(&PredicateSources {
        entry: &payload.entry_conditions,
        safety_orders: &[],
        exit: &payload.exit_conditions,
    });
    let rows = two_symbol_universe(&schema);
    let events = kernel::run(&payload, &schema, &rows);
    let ledger = accountant::run(&payload, &events);
    assert!(!ledger.is_empty());

    let exits = ledger
        .iter()
        .filter(|r| matches!(r.action.as_str(), "SELL" | "Stop Loss EXIT" | "Take Profit EXIT" | "Timeout EXIT"))
        .filter(|r| !r.trade_comment.contains("no-position exit"));

    // `real_balance` carries the source's extra per-exit fee leg on top of
    // `profit_loss` (see `accountant::run`'s exit branch), so the
    // reconciliation must subtract `order_size * fee` per exit as well.
    let fee = payload.fee_fraction();
    let (total_pnl, total_fee_leg) = exits.fold((0.0, 0.0), |(pnl, fee_leg), r| (pnl + r.profit_loss, fee_leg + r.order_size * fee));

    let final_real_balance = ledger.last().unwrap().real_balance;
    let reconciled = payload.initial_balance + total_pnl - total_fee_leg;
    let tolerance = 1e-6 * payload.initial_balance;
    assert!(
        (final_real_balance - reconciled).abs() < tolerance,
        "real_balance {final_real_balance} should reconcile with initial_balance + sum(profit_loss) - sum(order_size*fee) = {reconciled}"
    );
}

#[test]
fn drawdowns_are_monotonically_nondecreasing() {
    let mut payload = base_payload();
    payload.entry_conditions = vec![rsi_entry(40.0)];

    let schema = schema::resolve(&PredicateSources {
        entry: &payload.entry_conditions,
        safety_orders: &[],
        exit: &payload.exit_conditions,
    });
    let rows = two_symbol_universe(&schema);
    let events = kernel::run(&payload, &schema, &rows);
    let ledger = accountant::run(&payload, &events);
    assert!(!ledger.is_empty());

    let mut last_max_dd = 0.0;
    let mut last_max_realized_dd = 0.0;
    for row in &ledger {
        assert!(row.max_drawdown + 1e-9 >= last_max_dd, "max_drawdown regressed");
        assert!(row.max_realized_drawdown + 1e-9 >= last_max_realized_dd, "max_realized_drawdown regressed");
        last_max_dd = row.max_drawdown;
        last_max_realized_dd = row.max_realized_drawdown;
    }
}

#[test]
fn accountant_is_deterministic_given_the_same_event_journal() {
    let mut payload = base_payload();
    payload.entry_conditions = vec![rsi_entry(40.0)];

    let schema = schema::resolve(&PredicateSources {
        entry: &payload.entry_conditions,
        safety_orders: &[],
        exit: &payload.exit_conditions,
    });
    let rows = two_symbol_universe(&schema);
    let events = kernel::run(&payload, &schema, &rows);

    let first_pass = accountant::run(&payload, &events);
    let second_pass = accountant::run(&payload, &events);

    assert_eq!(first_pass.len(), second_pass.len());
    for (a, b) in first_pass.iter().zip(second_pass.iter()) {
        assert_eq!(a.trade_id, b.trade_id);
        assert_eq!(a.action, b.action);
        assert!((a.balance - b.balance).abs() < 1e-12);
        assert!((a.real_balance - b.real_balance).abs() < 1e-12);
    }
}

#[test]
fn schema_resolution_is_idempotent() {
    let entry = vec![rsi_entry(30.0)];
    let sources = PredicateSources { entry: &entry, safety_orders: &[], exit: &[] };
    let first = schema::resolve(&sources);
    let second = schema::resolve(&sources);
    assert_eq!(first.columns(), second.columns());
}

#[test]
fn cooldown_law_blocks_reentry_inside_the_window() {
    let mut payload = base_payload();
    payload.pairs = vec!["AAA/USDT".into()];
    payload.max_active_deals = 1;
    payload.cooldown_between_deals = 120;
    payload.entry_conditions = vec![rsi_entry(60.0)];

    let schema = schema::resolve(&PredicateSources {
        entry: &payload.entry_conditions,
        safety_orders: &[],
        exit: &payload.exit_conditions,
    });
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let closes: Vec<f64> = (0..400).map(|i| 100.0 + (i as f64 * 0.05).sin() * 10.0).collect();
    let mut rows = support::flat_bars("AAA/USDT", &closes, &schema, start);
    let rsi = support::rsi_series(&closes, 14);
    support::attach_column(&mut rows, &schema, "RSI_14", &rsi);

    let events = kernel::run(&payload, &schema, &rows);
    let mut exits: Vec<chrono::DateTime<Utc>> = Vec::new();
    let mut buys: Vec<chrono::DateTime<Utc>> = Vec::new();
    for e in &events {
        if e.action == TradeAction::Buy {
            buys.push(e.timestamp);
        } else if e.action.is_exit() {
            exits.push(e.timestamp);
        }
    }

    for buy_ts in &buys {
        for exit_ts in &exits {
            if exit_ts < buy_ts {
                let gap = (*buy_ts - *exit_ts).num_minutes();
                assert!(gap >= payload.cooldown_between_deals, "reentry at {buy_ts} only {gap} minutes after exit at {exit_ts}");
            }
        }
    }
}

#[test]
fn safety_order_ladder_fires_both_rungs_on_a_steady_decline() {
    let mut payload = base_payload();
    payload.pairs = vec!["AAA/USDT".into()];
    payload.max_active_deals = 1;
    payload.entry_conditions = vec![rsi_entry(60.0)];
    payload.safety_order_toggle = true;
    payload.safety_order_size = 1_000.0;
    payload.price_deviation = 2.0;
    payload.max_safety_orders_count = 2;
    payload.safety_order_volume_scale = 1.0;
    payload.safety_order_step_scale = 1.0;
    payload.take_profit_type = TakeProfitType::PercentageTotal;
    payload.target_profit = 1.0;

    let schema = schema::resolve(&PredicateSources {
        entry: &payload.entry_conditions,
        safety_orders: &[],
        exit: &payload.exit_conditions,
    });
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut closes = vec![100.0];
    for i in 1..40 {
        closes.push(100.0 - i as f64 * 1.0);
    }
    let mut rows = support::flat_bars("AAA/USDT", &closes, &schema, start);
    // Force the entry predicate true from the first bar regardless of RSI warmup.
    if let Some(idx) = schema.column_index("RSI_14") {
        for row in rows.iter_mut() {
            row.extra[idx] = Some(50.0);
        }
    }

    let events = kernel::run(&payload, &schema, &rows);
    let so_events: Vec<_> = events.iter().filter(|e| matches!(e.action, TradeAction::SafetyOrder(_))).collect();
    assert_eq!(so_events.len(), 2, "expected both safety-order rungs to fill on a steady decline");
}
