//! Simulation Kernel: the first-pass event loop. Walks the globally-sorted
//! row stream, drives each symbol's deal state machine, and emits the raw
//! `TradeEvent` stream. Order sizing here is always the flat
//! `base_order_size`/`safety_order_size` from the payload — the
//! reinvestment-scaled compounding is entirely the Accountant's concern;
//! the kernel only needs quantities accurate enough to drive its own
//! trigger math (average price, move-from-entry, SO ladder).
//!
//! Exit priority within one bar for one symbol, in order, each of SL /
//! Timeout / Condition / Take-Profit terminating the bar's processing for
//! that symbol immediately on firing: **Stop-Loss → Timeout → Condition
//! exit → hourly heartbeat → Take-Profit → Safety-order ladder**.

use chrono::Duration;
use std::collections::HashMap;

use crate::admission;
use crate::config::JobPayload;
use crate::predicate::{self, highest_timeframe};
use crate::risk::{self, DealRiskParams, LadderState};
use crate::types::{BarRow, Deal, Schema, Symbol, Timeframe, TradeAction, TradeEvent};

struct SymbolState {
    active_deal: Option<Deal>,
    last_close_time: Option<chrono::DateTime<chrono::Utc>>,
    last_row: Option<BarRow>,
    last_hour_check_ts: Option<chrono::DateTime<chrono::Utc>>,
}

impl Default for SymbolState {
    fn default() -> Self {
        SymbolState { active_deal: None, last_close_time: None, last_row: None, last_hour_check_ts: None }
    }
}

/// Outcome of one kernel pass: the raw trade event stream plus whether the
/// wall-clock budget expired before every row was processed.
pub struct KernelOutput {
    pub events: Vec<TradeEvent>,
    pub timed_out: bool,
}

/// Run the kernel over `rows` (already merged and globally sorted by
/// `(timestamp, symbol)`) and return the raw trade event stream. Never
/// times out; equivalent to `run_with_deadline(.., None)`.
pub fn run(payload: &JobPayload, schema: &Schema, rows: &[BarRow]) -> Vec<TradeEvent> {
    run_with_deadline(payload, schema, rows, None).events
}

/// As [`run`], but cooperatively checked against `deadline` at each bar
/// boundary: on expiry the loop stops before starting the next row, never
/// mid-bar, so no partial deal is ever left in the journal.
pub fn run_with_deadline(
    payload: &JobPayload,
    schema: &Schema,
    rows: &[BarRow],
    deadline: Option<std::time::Instant>,
) -> KernelOutput {
    let risk = DealRiskParams::from_payload(payload);
    let entry_tf = highest_timeframe(&payload.entry_conditions);
    let so_tf = highest_timeframe(&payload.safety_order_conditions);

    let has_entry_conditions = !payload.entry_conditions.is_empty();
    let has_exit_conditions = payload.exit_active && !payload.exit_conditions.is_empty();
    let has_safety_conditions = payload.safety_order_toggle && !payload.safety_order_conditions.is_empty();

    let mut states: HashMap<Symbol, SymbolState> = HashMap::new();
    let mut events = Vec::new();
    let mut candidate_buffer: Vec<BarRow> = Vec::new();
    let mut last_processed_time: Option<chrono::DateTime<chrono::Utc>> = None;
    let mut trade_id_counter: u64 = 0;
    let mut global_active_deals: u32 = 0;
    let cooldown = Duration::minutes(payload.cooldown_between_deals);
    let mut timed_out = false;

    for row in rows {
        if let Some(dl) = deadline {
            if std::time::Instant::now() >= dl {
                timed_out = true;
                break;
            }
        }

        if row.daily_vol_usdt < payload.min_daily_volume {
            continue;
        }

        let state = states.entry(row.symbol.clone()).or_default();

        if let Some(last_close) = state.last_close_time {
            if row.timestamp - last_close < cooldown {
                state.last_row = Some(row.clone());
                continue;
            }
        }

        let prev_row = state.last_row.take();
        state.last_row = Some(row.clone());

        if let Some(lpt) = last_processed_time {
            if row.timestamp != lpt {
                admit_candidates(
                    &mut candidate_buffer,
                    &mut states,
                    payload,
                    &risk,
                    entry_tf,
                    schema,
                    &mut trade_id_counter,
                    &mut global_active_deals,
                    &mut events,
                );
                last_processed_time = Some(row.timestamp);
            }
        }

        let state = states.get_mut(&row.symbol).expect("inserted above");
        match state.active_deal.as_mut() {
            None => {
                if has_entry_conditions && predicate::eval_all(schema, &payload.entry_conditions, row, prev_row.as_ref()) {
                    candidate_buffer.push(row.clone());
                }
            }
            Some(deal) => {
                let closed = step_active_deal(
                    deal,
                    row,
                    prev_row.as_ref(),
                    payload,
                    &risk,
                    schema,
                    has_exit_conditions,
                    has_safety_conditions,
                    so_tf,
                    &mut state.last_hour_check_ts,
                    &mut events,
                );
                if closed {
                    state.active_deal = None;
                    state.last_close_time = Some(row.timestamp);
                    global_active_deals = global_active_deals.saturating_sub(1);
                }
            }
        }

        if last_processed_time.is_none() {
            last_processed_time = Some(row.timestamp);
        }
    }

    if !candidate_buffer.is_empty() {
        admit_candidates(
            &mut candidate_buffer,
            &mut states,
            payload,
            &risk,
            entry_tf,
            schema,
            &mut trade_id_counter,
            &mut global_active_deals,
            &mut events,
        );
    }

    KernelOutput { events, timed_out }
}

#[allow(clippy::too_many_arguments)]
fn admit_candidates(
    candidate_buffer: &mut Vec<BarRow>,
    states: &mut HashMap<Symbol, SymbolState>,
    payload: &JobPayload,
    risk: &DealRiskParams,
    entry_tf: Option<Timeframe>,
    schema: &Schema,
    trade_id_counter: &mut u64,
    global_active_deals: &mut u32,
    events: &mut Vec<TradeEvent>,
) {
    let candidates = std::mem::take(candidate_buffer);
    let admitted = admission::admit(candidates, payload.max_active_deals, *global_active_deals);

    for candidate in admitted {
        let entry_price = candidate.close_for(schema, entry_tf).unwrap_or(candidate.close);
        if entry_price <= 1e-12 {
            continue;
        }
        *trade_id_counter += 1;
        let trade_id = format!("{}-{}", trade_id_counter, candidate.symbol);
        let qty = payload.base_order_size / entry_price;
        let amount = entry_price * qty;

        let ladder = LadderState::initial(entry_price, risk);
        let deal = Deal {
            trade_id: trade_id.clone(),
            entry_price,
            quantity: qty,
            total_cost: amount,
            placed_so_count: ladder.placed_so_count,
            last_so_price: ladder.last_so_price,
            last_so_size: ladder.last_so_size,
            so_dev_factor: ladder.so_dev_factor,
            next_so_trigger_price: ladder.next_so_price,
            stop_loss_trigger: risk::stop_loss_trigger(entry_price, risk),
            take_profit_trigger: risk::initial_take_profit_trigger(entry_price, risk),
            time_opened: candidate.timestamp,
        };

        events.push(TradeEvent {
            timestamp: candidate.timestamp,
            symbol: candidate.symbol.clone(),
            action: TradeAction::Buy,
            price: entry_price,
            quantity: qty,
            amount,
            total_amount: amount,
            profit_percent: None,
            move_from_entry: 0.0,
            trade_comment: "Condition-based Entry".to_string(),
            trade_id,
        });

        *global_active_deals += 1;
        states.entry(candidate.symbol.clone()).or_default().active_deal = Some(deal);
    }
}

#[allow(clippy::too_many_arguments)]
fn step_active_deal(
    deal: &mut Deal,
    row: &BarRow,
    prev_row: Option<&BarRow>,
    payload: &JobPayload,
    risk: &DealRiskParams,
    schema: &Schema,
    has_exit_conditions: bool,
    has_safety_conditions: bool,
    so_tf: Option<Timeframe>,
    last_hour_check_ts: &mut Option<chrono::DateTime<chrono::Utc>>,
    events: &mut Vec<TradeEvent>,
) -> bool {
    let move_from_entry = if deal.entry_price > 1e-12 {
        (row.close - deal.entry_price) / deal.entry_price
    } else {
        0.0
    };
    let time_since_open = row.timestamp - deal.time_opened;

    // 1. Stop loss
    if let Some(trigger) = deal.stop_loss_trigger {
        if time_since_open >= Duration::minutes(risk.stop_loss_timeout_minutes) && row.close <= trigger {
            emit_exit(
                events,
                deal,
                row,
                TradeAction::StopLossExit,
                row.close,
                move_from_entry,
                format!("Stop loss triggered at {}%", payload.stop_loss_value),
            );
            return true;
        }
    }

    // 2. Timeout
    if risk.close_deal_after_timeout_minutes > 0
        && time_since_open >= Duration::minutes(risk.close_deal_after_timeout_minutes)
    {
        emit_exit(
            events,
            deal,
            row,
            TradeAction::TimeoutExit,
            row.close,
            move_from_entry,
            format!("Deal closed after timeout of {} minutes", payload.close_deal_after_timeout),
        );
        return true;
    }

    // 3. Condition exit
    if has_exit_conditions && predicate::eval_all(schema, &payload.exit_conditions, row, prev_row) {
        let amount = row.close * deal.quantity;
        let profit_percent = if deal.total_cost > 0.0 { (amount - deal.total_cost) / deal.total_cost } else { 0.0 };
        if !risk.minprof_toggle || profit_percent >= risk.minimal_profit_fraction {
            let comment = if risk.minprof_toggle {
                "Exit triggered by conditions + min profit".to_string()
            } else {
                "Exit triggered by conditions".to_string()
            };
            emit_exit(events, deal, row, TradeAction::Sell, row.close, move_from_entry, comment);
            return true;
        }
    }

    // 4. Hourly heartbeat (non-trade, falls through either way)
    match last_hour_check_ts {
        None => *last_hour_check_ts = Some(row.timestamp),
        Some(ts) => {
            let hours_since = (row.timestamp - *ts).num_seconds() as f64 / 3600.0;
            if hours_since >= 1.0 {
                events.push(TradeEvent {
                    timestamp: row.timestamp,
                    symbol: row.symbol.clone(),
                    action: TradeAction::HourCheck,
                    price: row.close,
                    quantity: 0.0,
                    amount: 0.0,
                    total_amount: 0.0,
                    profit_percent: None,
                    move_from_entry: 0.0,
                    trade_comment: "Hourly checkpoint".to_string(),
                    trade_id: String::new(),
                });
                *last_hour_check_ts = Some(row.timestamp);
            }
        }
    }

    // 5. Take profit (fills at the trigger price, not the bar's close)
    if payload.price_change_active {
        if let Some(trigger) = deal.take_profit_trigger {
            if row.close >= trigger {
                emit_exit(
                    events,
                    deal,
                    row,
                    TradeAction::TakeProfitExit,
                    trigger,
                    move_from_entry,
                    format!("Take profit triggered at {}%", payload.target_profit),
                );
                return true;
            }
        }
    }

    // 6. Safety-order ladder
    if has_safety_conditions || payload.safety_order_toggle {
        let safety_active = !has_safety_conditions || predicate::eval_all(schema, &payload.safety_order_conditions, row, prev_row);
        if safety_active {
            let so_close = row.close_for(schema, so_tf).unwrap_or(row.close);
            let mut ladder = LadderState {
                placed_so_count: deal.placed_so_count,
                last_so_price: deal.last_so_price,
                last_so_size: deal.last_so_size,
                so_dev_factor: deal.so_dev_factor,
                next_so_price: deal.next_so_trigger_price,
            };
            let fills = ladder.apply_fills(so_close, risk);
            let mut rung = deal.placed_so_count;
            for fill in fills {
                rung += 1;
                let so_qty = if fill.price > 1e-12 { fill.dollar_size / fill.price } else { 0.0 };
                deal.quantity += so_qty;
                deal.total_cost += fill.dollar_size;
                let move_from_entry = if deal.entry_price > 1e-12 {
                    (fill.price - deal.entry_price) / deal.entry_price
                } else {
                    0.0
                };
                if payload.take_profit_type == crate::config::TakeProfitType::PercentageTotal {
                    deal.take_profit_trigger = Some(risk::recompute_take_profit(deal.avg_price(), risk));
                }
                events.push(TradeEvent {
                    timestamp: row.timestamp,
                    symbol: row.symbol.clone(),
                    action: TradeAction::SafetyOrder(rung),
                    price: fill.price,
                    quantity: so_qty,
                    amount: fill.dollar_size,
                    total_amount: deal.total_cost,
                    profit_percent: None,
                    move_from_entry,
                    trade_comment: format!("Added safety order #{rung}"),
                    trade_id: deal.trade_id.clone(),
                });
            }
            deal.placed_so_count = ladder.placed_so_count;
            deal.last_so_price = ladder.last_so_price;
            deal.last_so_size = ladder.last_so_size;
            deal.so_dev_factor = ladder.so_dev_factor;
            deal.next_so_trigger_price = ladder.next_so_price;
        }
    }

    false
}

fn emit_exit(
    events: &mut Vec<TradeEvent>,
    deal: &Deal,
    row: &BarRow,
    action: TradeAction,
    price: f64,
    move_from_entry: f64,
    comment: String,
) {
    let qty = deal.quantity;
    let amount = price * qty;
    let profit_percent = if deal.total_cost > 0.0 { (amount - deal.total_cost) / deal.total_cost } else { 0.0 };
    events.push(TradeEvent {
        timestamp: row.timestamp,
        symbol: row.symbol.clone(),
        action,
        price,
        quantity: qty,
        amount,
        total_amount: deal.total_cost,
        profit_percent: Some(profit_percent),
        move_from_entry,
        trade_comment: comment,
        trade_id: deal.trade_id.clone(),
    });
}
