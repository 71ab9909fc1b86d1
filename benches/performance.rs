//! Performance benchmarks for the backtesting engine.
//!
//! Run with: `cargo bench`
//! View results: `open target/criterion/report/index.html`

use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use dca_backtest_engine::config::TakeProfitType;
use dca_backtest_engine::{accountant, kernel, JobPayload, Schema, Symbol};

fn sample_payload(pairs: Vec<String>) -> JobPayload {
    JobPayload {
        strategy_name: "bench".into(),
        pairs,
        start_date: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        end_date: chrono::NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        initial_balance: 10_000.0,
        base_order_size: 200.0,
        trading_fee: 0.1,
        reinvest_profit: 50.0,
        risk_reduction: 25.0,
        max_active_deals: 5,
        cooldown_between_deals: 30,
        min_daily_volume: 0.0,
        entry_conditions: vec![],
        exit_conditions: vec![],
        exit_active: false,
        safety_order_conditions: vec![],
        safety_order_toggle: true,
        safety_order_size: 200.0,
        price_deviation: 2.0,
        max_safety_orders_count: 3,
        safety_order_volume_scale: 1.5,
        safety_order_step_scale: 1.2,
        stop_loss_toggle: true,
        stop_loss_value: 10.0,
        stop_loss_timeout: 0,
        target_profit: 1.5,
        take_profit_type: TakeProfitType::PercentageTotal,
        price_change_active: false,
        minprof_toggle: false,
        minimal_profit: 0.0,
        close_deal_after_timeout: 0,
        trailing_toggle: false,
        trailing_deviation: 0.0,
    }
}

/// A synthetic oscillating close series: enough swing to trigger entries,
/// safety orders, and exits repeatedly across a multi-month run.
fn oscillating_rows(symbol: &str, n: usize, schema: &Schema) -> Vec<dca_backtest_engine::BarRow> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (0..n)
        .map(|i| {
            let phase = (i as f64 * 0.01).sin();
            let close = 100.0 + phase * 8.0;
            dca_backtest_engine::BarRow {
                timestamp: start + chrono::Duration::minutes(i as i64),
                symbol: Symbol::new(symbol),
                open: close,
                high: close + 0.1,
                low: close - 0.1,
                close,
                volume: 1_000.0,
                daily_vol_usdt: 10_000_000.0,
                extra: vec![None; schema.len()],
            }
        })
        .collect()
}

fn benchmark_kernel_single_symbol(c: &mut Criterion) {
    let schema = Schema::new(vec![]);
    let payload = sample_payload(vec!["AAA/USDT".into()]);
    let rows = oscillating_rows("AAA/USDT", 50_000, &schema);

    c.bench_function("kernel_single_symbol_50k_bars", |b| {
        b.iter(|| black_box(kernel::run(&payload, &schema, &rows)))
    });
}

fn benchmark_kernel_multi_symbol(c: &mut Criterion) {
    let schema = Schema::new(vec![]);
    let symbols = ["AAA/USDT", "BBB/USDT", "CCC/USDT", "DDD/USDT", "EEE/USDT"];
    let payload = sample_payload(symbols.iter().map(|s| s.to_string()).collect());
    let per_symbol: Vec<_> = symbols.iter().map(|s| oscillating_rows(s, 10_000, &schema)).collect();
    let mut rows: Vec<_> = per_symbol.into_iter().flatten().collect();
    rows.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.symbol.cmp(&b.symbol)));

    c.bench_function("kernel_five_symbols_10k_bars_each", |b| {
        b.iter(|| black_box(kernel::run(&payload, &schema, &rows)))
    });
}

fn benchmark_accountant_pass(c: &mut Criterion) {
    let schema = Schema::new(vec![]);
    let payload = sample_payload(vec!["AAA/USDT".into()]);
    let rows = oscillating_rows("AAA/USDT", 50_000, &schema);
    let events = kernel::run(&payload, &schema, &rows);

    c.bench_function("accountant_pass_over_kernel_events", |b| {
        b.iter(|| black_box(accountant::run(&payload, &events)))
    });
}

criterion_group!(benches, benchmark_kernel_single_symbol, benchmark_kernel_multi_symbol, benchmark_accountant_pass);
criterion_main!(benches);
