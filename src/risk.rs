//! Per-deal risk math: stop-loss/take-profit trigger prices and the
//! safety-order (DCA) ladder.
//!
//! Unlike a portfolio-level risk manager (position sizing against total
//! capital), every computation here is scoped to a single `Deal` — the
//! backtest engine's risk model is fixed base/safety order sizes scaled by
//! a reinvestment fraction, not portfolio heat or volatility-adjusted
//! sizing.
//!
//! # Safety-order ladder
//! A tranche triggers when the bar's close drops below the cached
//! `next_so_price` threshold. It fills *at that close price*, not at the
//! threshold itself; the threshold is then recomputed from the actual fill
//! price for the next rung:
//! ```text
//! so_dev_factor *= safety_order_step_scale
//! next_so_price = fill_price * (1 - price_deviation * so_dev_factor)
//! so_size *= safety_order_volume_scale
//! ```
//! Every tranche that triggers within the same bar fills at that bar's
//! single close price, with sizes scaling geometrically one rung at a time.

use crate::config::{JobPayload, TakeProfitType};

/// Resolved, per-deal risk parameters derived once from the job payload.
/// Percent fields from the payload are pre-divided by 100 here so the
/// kernel never repeats that conversion.
#[derive(Debug, Clone, Copy)]
pub struct DealRiskParams {
    pub stop_loss_toggle: bool,
    pub stop_loss_fraction: f64,
    pub stop_loss_timeout_minutes: i64,
    pub target_profit_fraction: f64,
    pub take_profit_type: TakeProfitType,
    pub price_change_active: bool,
    pub minprof_toggle: bool,
    pub minimal_profit_fraction: f64,
    pub close_deal_after_timeout_minutes: i64,
    pub safety_order_toggle: bool,
    pub safety_order_size: f64,
    pub price_deviation_fraction: f64,
    pub max_safety_orders_count: u32,
    pub safety_order_volume_scale: f64,
    pub safety_order_step_scale: f64,
}

impl DealRiskParams {
    pub fn from_payload(payload: &JobPayload) -> Self {
        DealRiskParams {
            stop_loss_toggle: payload.stop_loss_toggle,
            stop_loss_fraction: payload.stop_loss_value / 100.0,
            stop_loss_timeout_minutes: payload.stop_loss_timeout,
            target_profit_fraction: payload.target_profit / 100.0,
            take_profit_type: payload.take_profit_type,
            price_change_active: payload.price_change_active,
            minprof_toggle: payload.minprof_toggle,
            minimal_profit_fraction: payload.minimal_profit / 100.0,
            close_deal_after_timeout_minutes: payload.close_deal_after_timeout,
            safety_order_toggle: payload.safety_order_toggle,
            safety_order_size: payload.safety_order_size,
            price_deviation_fraction: payload.price_deviation / 100.0,
            max_safety_orders_count: payload.max_safety_orders_count,
            safety_order_volume_scale: payload.safety_order_volume_scale,
            safety_order_step_scale: payload.safety_order_step_scale,
        }
    }
}

/// `entry_price * (1 - stop_loss_fraction)`. Computed whenever the stop
/// loss is enabled with a positive value, independent of whether the SL
/// exit path itself is later consulted.
pub fn stop_loss_trigger(entry_price: f64, params: &DealRiskParams) -> Option<f64> {
    (params.stop_loss_toggle && params.stop_loss_fraction > 0.0)
        .then(|| entry_price * (1.0 - params.stop_loss_fraction))
}

/// Take-profit trigger for a freshly opened deal, tracked whenever
/// `target_profit_fraction` is positive. Whether the TP exit path is ever
/// consulted is a separate, orthogonal toggle (`price_change_active`),
/// checked by the kernel at exit time — not here. For `PercentageBase`
/// this is the only time the trigger is ever computed; for
/// `PercentageTotal` it is recomputed by [`recompute_take_profit`] on
/// every safety-order fill.
pub fn initial_take_profit_trigger(entry_price: f64, params: &DealRiskParams) -> Option<f64> {
    (params.target_profit_fraction > 0.0).then(|| entry_price * (1.0 + params.target_profit_fraction))
}

/// Recompute the take-profit trigger after an average-price change. Only
/// meaningful for `TakeProfitType::PercentageTotal`; callers must not call
/// this for `PercentageBase` deals (the trigger stays fixed at open).
pub fn recompute_take_profit(avg_price: f64, params: &DealRiskParams) -> f64 {
    avg_price * (1.0 + params.target_profit_fraction)
}

/// One safety-order tranche triggered within a single bar. `dollar_size` is
/// the order's notional (pre-fee); `quantity = dollar_size / price`.
#[derive(Debug, Clone, Copy)]
pub struct SafetyFill {
    pub price: f64,
    pub dollar_size: f64,
}

/// State the ladder needs between bars, owned by the `Deal`.
#[derive(Debug, Clone, Copy)]
pub struct LadderState {
    pub placed_so_count: u32,
    pub last_so_price: f64,
    pub last_so_size: f64,
    pub so_dev_factor: f64,
    pub next_so_price: Option<f64>,
}

impl LadderState {
    pub fn initial(entry_price: f64, params: &DealRiskParams) -> Self {
        let next_so_price = (params.safety_order_toggle && params.max_safety_orders_count > 0)
            .then(|| entry_price * (1.0 - params.price_deviation_fraction));
        LadderState {
            placed_so_count: 0,
            last_so_price: entry_price,
            last_so_size: params.safety_order_size,
            so_dev_factor: 1.0,
            next_so_price,
        }
    }

    /// Apply every safety-order tranche whose threshold the current bar's
    /// `close` has crossed. All tranches triggered within one bar fill at
    /// that same `close`. Mutates `self` in place; returns the fills in
    /// trigger order (empty if none triggered).
    pub fn apply_fills(&mut self, close: f64, params: &DealRiskParams) -> Vec<SafetyFill> {
        let mut fills = Vec::new();
        if !params.safety_order_toggle {
            return fills;
        }

        // First pass: count how many rungs this bar crosses, without
        // mutating the deal's state, by projecting the threshold forward.
        let orders_remaining = params.max_safety_orders_count.saturating_sub(self.placed_so_count);
        let mut temp_next = match self.next_so_price {
            Some(v) => v,
            None => return fills,
        };
        let mut temp_dev = self.so_dev_factor;
        let mut orders_to_trigger = 0u32;
        for _ in 0..orders_remaining {
            if close < temp_next {
                orders_to_trigger += 1;
                temp_dev *= params.safety_order_step_scale;
                temp_next *= 1.0 - params.price_deviation_fraction * temp_dev;
            } else {
                break;
            }
        }

        let mut so_size = self.last_so_size;
        for _ in 0..orders_to_trigger {
            fills.push(SafetyFill { price: close, dollar_size: so_size });
            self.placed_so_count += 1;
            self.last_so_price = close;
            self.so_dev_factor *= params.safety_order_step_scale;
            self.next_so_price = Some(self.last_so_price * (1.0 - params.price_deviation_fraction * self.so_dev_factor));
            so_size *= params.safety_order_volume_scale;
        }
        self.last_so_size = so_size;

        fills
    }
}
