//! Indicator fixtures for integration tests, powered by the `ta` crate.
//!
//! The engine itself never computes an indicator at runtime — it consumes
//! precomputed columns off a `Schema`. To exercise the Predicate Evaluator
//! and the kernel against something more realistic than hand-picked
//! constants, these helpers run raw OHLCV series through `ta` and splice
//! the results into `BarRow::extra` at the offsets the column names
//! resolve to, the same way the on-disk indicator store would.

use dca_backtest_engine::{BarRow, Schema, Symbol};
use ta::indicators::{
    BollingerBands as TaBB, FastStochastic, MovingAverageConvergenceDivergence as TaMacd,
    RelativeStrengthIndex,
};
use ta::{DataItem, Next};

pub fn rsi_series(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut indicator = RelativeStrengthIndex::new(period).expect("valid RSI period");
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| if i + 1 >= period { Some(indicator.next(c)) } else { indicator.next(c); None })
        .collect()
}

/// Returns `(macd_line, signal_line)`.
pub fn macd_series(closes: &[f64], fast: usize, slow: usize, signal: usize) -> (Vec<Option<f64>>, Vec<Option<f64>>) {
    let mut indicator = TaMacd::new(fast, slow, signal).expect("valid MACD periods");
    let warmup = slow + signal;
    let mut main = Vec::with_capacity(closes.len());
    let mut sig = Vec::with_capacity(closes.len());
    for (i, &c) in closes.iter().enumerate() {
        let out = indicator.next(c);
        if i + 1 >= warmup {
            main.push(Some(out.macd));
            sig.push(Some(out.signal));
        } else {
            main.push(None);
            sig.push(None);
        }
    }
    (main, sig)
}

/// `%B = (close - lower) / (upper - lower)`, the normalized form the
/// `BollingerBands` predicate family checks against.
pub fn bollinger_percent_b_series(closes: &[f64], period: usize, deviation: f64) -> Vec<Option<f64>> {
    let mut indicator = TaBB::new(period, deviation).expect("valid Bollinger Bands params");
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let bands = indicator.next(c);
            if i + 1 < period {
                return None;
            }
            let width = bands.upper - bands.lower;
            if width.abs() < 1e-12 {
                Some(0.5)
            } else {
                Some((c - bands.lower) / width)
            }
        })
        .collect()
}

/// Returns `(%K, %D)`, `%D` smoothed as a trailing mean of `%K` over
/// `d_smooth` bars, rather than `ta`'s own `SlowStochastic`, which couples
/// `%K` smoothing to the same window.
pub fn stochastic_series(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    k_period: usize,
    d_smooth: usize,
) -> (Vec<Option<f64>>, Vec<Option<f64>>) {
    let mut indicator = FastStochastic::new(k_period).expect("valid stochastic period");
    let mut k = Vec::with_capacity(closes.len());
    for i in 0..closes.len() {
        let item = DataItem::builder()
            .open(closes[i])
            .high(highs[i])
            .low(lows[i])
            .close(closes[i])
            .volume(0.0)
            .build()
            .expect("well-formed OHLCV bar");
        let value = indicator.next(&item);
        k.push(if i + 1 >= k_period { Some(value) } else { None });
    }

    let d = k
        .windows(d_smooth)
        .map(|w| {
            let vals: Vec<f64> = w.iter().filter_map(|v| *v).collect();
            if vals.len() == d_smooth { Some(vals.iter().sum::<f64>() / d_smooth as f64) } else { None }
        })
        .collect::<Vec<_>>();
    let padding = closes.len() - d.len();
    let d = std::iter::repeat(None).take(padding).chain(d).collect();

    (k, d)
}

/// Splice `values` into `rows[i].extra[idx]` at the offset `column` resolves
/// to in `schema`. A no-op if `column` isn't part of the schema (the
/// predicate referencing it wasn't included when the fixture's schema was
/// built).
pub fn attach_column(rows: &mut [BarRow], schema: &Schema, column: &str, values: &[Option<f64>]) {
    let Some(idx) = schema.column_index(column) else { return };
    for (row, &value) in rows.iter_mut().zip(values) {
        if idx < row.extra.len() {
            row.extra[idx] = value;
        }
    }
}

/// Build a flat run of one-minute bars from a close-price series, with
/// `open == high == low == close` and a constant volume — sufficient for
/// tests that only care about the indicator columns layered on top.
pub fn flat_bars(symbol: &str, closes: &[f64], schema: &Schema, start: chrono::DateTime<chrono::Utc>) -> Vec<BarRow> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| BarRow {
            timestamp: start + chrono::Duration::minutes(i as i64),
            symbol: Symbol::new(symbol),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            daily_vol_usdt: 1_000_000.0,
            extra: vec![None; schema.len()],
        })
        .collect()
}
