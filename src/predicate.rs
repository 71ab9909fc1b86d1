//! The Predicate Evaluator: a pure function from `(row, prev_row,
//! predicate)` to `bool`, dispatching on indicator family.
//!
//! Predicates are a tagged `enum` keyed by indicator family, with
//! per-family sub-parameter records instead of a loosely-typed "operator +
//! optional threshold" pair shared across all families — this removes a
//! whole class of "this operator doesn't apply to this family" bugs that
//! a stringly-typed dispatch can't catch.
//!
//! A predicate list is conjunctive: it evaluates to `true` iff every member
//! evaluates to `true`. An empty list is `true`.

use crate::types::{BarRow, Schema, Timeframe, TvRating};
use serde::{Deserialize, Serialize};

/// Moving-average flavor for the `Ma` family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaType {
    Sma,
    Ema,
}

impl MaType {
    fn column_prefix(self) -> &'static str {
        match self {
            MaType::Sma => "SMA",
            MaType::Ema => "EMA",
        }
    }
}

/// A single-value threshold/crossing check against a numeric threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ValueCheck {
    LessThan(f64),
    GreaterThan(f64),
    CrossingUp(f64),
    CrossingDown(f64),
}

impl ValueCheck {
    fn eval(self, prev: Option<f64>, curr: Option<f64>) -> bool {
        let Some(curr) = curr else { return false };
        match self {
            ValueCheck::LessThan(v) => curr < v,
            ValueCheck::GreaterThan(v) => curr > v,
            ValueCheck::CrossingUp(v) => match prev {
                Some(prev) => prev <= v && curr > v,
                None => false,
            },
            ValueCheck::CrossingDown(v) => match prev {
                Some(prev) => prev >= v && curr < v,
                None => false,
            },
        }
    }
}

/// Fast-vs-slow comparison/crossing check, used by the `Ma` family (no
/// numeric threshold — both sides are columns).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum CompareCheck {
    LessThan,
    GreaterThan,
    CrossingUp,
    CrossingDown,
}

impl CompareCheck {
    fn eval(self, prev_fast: Option<f64>, prev_slow: Option<f64>, fast: Option<f64>, slow: Option<f64>) -> bool {
        let (Some(fast), Some(slow)) = (fast, slow) else {
            return false;
        };
        match self {
            CompareCheck::LessThan => fast < slow,
            CompareCheck::GreaterThan => fast > slow,
            CompareCheck::CrossingUp => match (prev_fast, prev_slow) {
                (Some(pf), Some(ps)) => pf <= ps && fast > slow,
                _ => false,
            },
            CompareCheck::CrossingDown => match (prev_fast, prev_slow) {
                (Some(pf), Some(ps)) => pf >= ps && fast < slow,
                _ => false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum CrossDirection {
    Up,
    Down,
}

/// MACD's optional zero-line filter, applied in addition to (not instead
/// of) the crossing check when both are present.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ZeroLineFilter {
    GreaterThanZero,
    LessThanZero,
}

/// ParabolicSAR-specific checks: plain threshold compares, or a
/// close-vs-PSAR crossing (long/short).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum PsarCheck {
    LessThan(f64),
    GreaterThan(f64),
    CrossingLong,
    CrossingShort,
}

/// Indicator family with its own sub-parameters and check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IndicatorFamily {
    Rsi { length: u32, check: ValueCheck },
    Ma { ma_type: MaType, fast: u32, slow: u32, check: CompareCheck },
    BollingerBands { period: u32, deviation: u32, check: ValueCheck },
    Macd {
        fast: u32,
        slow: u32,
        signal: u32,
        crossing: Option<CrossDirection>,
        zero_line: Option<ZeroLineFilter>,
    },
    Stochastic {
        k_period: u32,
        k_smooth: u32,
        d_smooth: u32,
        k_check: Option<ValueCheck>,
        d_cross: Option<CrossDirection>,
    },
    ParabolicSar { step: f64, max: f64, check: PsarCheck },
    HeikenAshi { check: ValueCheck },
    TradingView { rating: TvRating },
}

/// A predicate: an indicator family evaluated at a given timeframe.
/// `timeframe: None` means "the job's base timeframe" (no `_<t>` suffix and
/// no bar-close gate, since every row of the base series is itself a
/// bar-close of the base timeframe).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Predicate {
    pub family: IndicatorFamily,
    pub timeframe: Option<Timeframe>,
}

fn suffixed(base: &str, tf: Option<Timeframe>) -> String {
    match tf {
        None => base.to_string(),
        Some(t) => format!("{base}_{}", t.suffix()),
    }
}

impl Predicate {
    /// The set of columns this predicate needs. Does not include the base
    /// OHLCV set or the close-mirror/bar-close columns — those are added
    /// unconditionally by the Schema Resolver for every non-base timeframe
    /// in use.
    pub fn required_columns(&self) -> Vec<String> {
        match &self.family {
            IndicatorFamily::Rsi { length, .. } => {
                vec![suffixed(&format!("RSI_{length}"), self.timeframe)]
            }
            IndicatorFamily::Ma { ma_type, fast, slow, .. } => vec![
                suffixed(&format!("{}_{fast}", ma_type.column_prefix()), self.timeframe),
                suffixed(&format!("{}_{slow}", ma_type.column_prefix()), self.timeframe),
            ],
            IndicatorFamily::BollingerBands { period, deviation, .. } => {
                vec![suffixed(&format!("BB_%B_{period}_{deviation}"), self.timeframe)]
            }
            IndicatorFamily::Macd { fast, slow, signal, .. } => vec![
                suffixed(&format!("MACD_{fast}_{slow}_{signal}"), self.timeframe),
                suffixed(&format!("MACD_{fast}_{slow}_{signal}_Signal"), self.timeframe),
            ],
            IndicatorFamily::Stochastic { k_period, k_smooth, d_smooth, .. } => vec![
                suffixed(&format!("Stochastic_K_{k_period}_{k_smooth}"), self.timeframe),
                suffixed(
                    &format!("Stochastic_D_{k_period}_{k_smooth}_{d_smooth}"),
                    self.timeframe,
                ),
            ],
            IndicatorFamily::ParabolicSar { step, max, .. } => {
                vec![suffixed(&format!("PSAR_AF_{step}_Max_{max}"), self.timeframe)]
            }
            IndicatorFamily::HeikenAshi { .. } => vec![suffixed("HA_Close", self.timeframe)],
            IndicatorFamily::TradingView { .. } => vec![suffixed("tv_tech_label", self.timeframe)],
        }
    }

    /// Evaluate this predicate on `(row, prev_row)`. Any null input, or a
    /// bar-close gate of `false` for a non-base timeframe, fails the
    /// predicate rather than erroring — predicate-level errors are never
    /// raised.
    pub fn eval(&self, schema: &Schema, row: &BarRow, prev_row: Option<&BarRow>) -> bool {
        if !row.bar_close(schema, self.timeframe) {
            return false;
        }

        match &self.family {
            IndicatorFamily::Rsi { length, check } => {
                let col = suffixed(&format!("RSI_{length}"), self.timeframe);
                let curr = row.get(schema, &col);
                let prev = prev_row.and_then(|p| p.get(schema, &col));
                check.eval(prev, curr)
            }
            IndicatorFamily::Ma { ma_type, fast, slow, check } => {
                let fast_col = suffixed(&format!("{}_{fast}", ma_type.column_prefix()), self.timeframe);
                let slow_col = suffixed(&format!("{}_{slow}", ma_type.column_prefix()), self.timeframe);
                let fast_v = row.get(schema, &fast_col);
                let slow_v = row.get(schema, &slow_col);
                let prev_fast = prev_row.and_then(|p| p.get(schema, &fast_col));
                let prev_slow = prev_row.and_then(|p| p.get(schema, &slow_col));
                check.eval(prev_fast, prev_slow, fast_v, slow_v)
            }
            IndicatorFamily::BollingerBands { period, deviation, check } => {
                let col = suffixed(&format!("BB_%B_{period}_{deviation}"), self.timeframe);
                let curr = row.get(schema, &col);
                let prev = prev_row.and_then(|p| p.get(schema, &col));
                check.eval(prev, curr)
            }
            IndicatorFamily::Macd { fast, slow, signal, crossing, zero_line } => {
                let main_col = suffixed(&format!("MACD_{fast}_{slow}_{signal}"), self.timeframe);
                let sig_col = suffixed(&format!("MACD_{fast}_{slow}_{signal}_Signal"), self.timeframe);
                let main_v = row.get(schema, &main_col);
                let sig_v = row.get(schema, &sig_col);
                let (Some(main_v), Some(sig_v)) = (main_v, sig_v) else {
                    return false;
                };

                if let Some(dir) = crossing {
                    let prev_main = prev_row.and_then(|p| p.get(schema, &main_col));
                    let prev_sig = prev_row.and_then(|p| p.get(schema, &sig_col));
                    let (Some(prev_main), Some(prev_sig)) = (prev_main, prev_sig) else {
                        return false;
                    };
                    let crossed = match dir {
                        CrossDirection::Up => prev_main <= prev_sig && main_v > sig_v,
                        CrossDirection::Down => prev_main >= prev_sig && main_v < sig_v,
                    };
                    if !crossed {
                        return false;
                    }
                }

                match zero_line {
                    Some(ZeroLineFilter::GreaterThanZero) => main_v > 0.0,
                    Some(ZeroLineFilter::LessThanZero) => main_v < 0.0,
                    None => true,
                }
            }
            IndicatorFamily::Stochastic { k_period, k_smooth, d_smooth, k_check, d_cross } => {
                let k_col = suffixed(&format!("Stochastic_K_{k_period}_{k_smooth}"), self.timeframe);
                let d_col = suffixed(
                    &format!("Stochastic_D_{k_period}_{k_smooth}_{d_smooth}"),
                    self.timeframe,
                );
                let k_v = row.get(schema, &k_col);
                let Some(k_v) = k_v else { return false };

                if let Some(check) = k_check {
                    let prev_k = prev_row.and_then(|p| p.get(schema, &k_col));
                    if !check.eval(prev_k, Some(k_v)) {
                        return false;
                    }
                }

                if let Some(dir) = d_cross {
                    let d_v = row.get(schema, &d_col);
                    let prev_k = prev_row.and_then(|p| p.get(schema, &k_col));
                    let prev_d = prev_row.and_then(|p| p.get(schema, &d_col));
                    let (Some(d_v), Some(prev_k), Some(prev_d)) = (d_v, prev_k, prev_d) else {
                        return false;
                    };
                    let crossed = match dir {
                        CrossDirection::Up => prev_k <= prev_d && k_v > d_v,
                        CrossDirection::Down => prev_k >= prev_d && k_v < d_v,
                    };
                    if !crossed {
                        return false;
                    }
                }

                true
            }
            IndicatorFamily::ParabolicSar { step, max, check } => {
                let col = suffixed(&format!("PSAR_AF_{step}_Max_{max}"), self.timeframe);
                let psar = row.get(schema, &col);
                let Some(psar) = psar else { return false };
                match check {
                    PsarCheck::LessThan(v) => psar < *v,
                    PsarCheck::GreaterThan(v) => psar > *v,
                    PsarCheck::CrossingLong | PsarCheck::CrossingShort => {
                        let prev_psar = prev_row.and_then(|p| p.get(schema, &col));
                        let Some(prev_psar) = prev_psar else {
                            return false;
                        };
                        let Some(prev_row) = prev_row else { return false };
                        let close_prev = prev_row.close;
                        let close_now = row.close;
                        match check {
                            PsarCheck::CrossingLong => close_prev <= prev_psar && close_now > psar,
                            PsarCheck::CrossingShort => close_prev >= prev_psar && close_now < psar,
                            _ => unreachable!(),
                        }
                    }
                }
            }
            IndicatorFamily::HeikenAshi { check } => {
                let col = suffixed("HA_Close", self.timeframe);
                let curr = row.get(schema, &col);
                let prev = prev_row.and_then(|p| p.get(schema, &col));
                check.eval(prev, curr)
            }
            IndicatorFamily::TradingView { rating } => {
                // tv_tech_label is stored as an encoded ordinal (see
                // `TvRating`) so it can live in the same f64 column slab as
                // every numeric indicator.
                let col = suffixed("tv_tech_label", self.timeframe);
                let encoded = row.get(schema, &col);
                let Some(encoded) = encoded else { return false };
                let Some(observed) = decode_tv_rating(encoded) else {
                    return false;
                };
                observed.matches(*rating)
            }
        }
    }
}

/// `TvRating` is stored in `BarRow`'s numeric column slab as an ordinal so
/// the evaluator never needs a separate string-column path.
pub fn encode_tv_rating(rating: TvRating) -> f64 {
    match rating {
        TvRating::StrongSell => -2.0,
        TvRating::Sell => -1.0,
        TvRating::Neutral => 0.0,
        TvRating::Buy => 1.0,
        TvRating::StrongBuy => 2.0,
    }
}

fn decode_tv_rating(v: f64) -> Option<TvRating> {
    match v.round() as i64 {
        -2 => Some(TvRating::StrongSell),
        -1 => Some(TvRating::Sell),
        0 => Some(TvRating::Neutral),
        1 => Some(TvRating::Buy),
        2 => Some(TvRating::StrongBuy),
        _ => None,
    }
}

/// Evaluate a conjunctive predicate list. An empty list is `true`.
pub fn eval_all(schema: &Schema, predicates: &[Predicate], row: &BarRow, prev_row: Option<&BarRow>) -> bool {
    predicates.iter().all(|p| p.eval(schema, row, prev_row))
}

/// The highest-priority timeframe referenced by a predicate list (the
/// source's `get_highest_timeframe`), used to pick the close column an
/// admitted entry/safety/exit actually transacts at. `None` (base
/// timeframe) if the list is empty.
pub fn highest_timeframe(predicates: &[Predicate]) -> Option<Timeframe> {
    predicates
        .iter()
        .filter_map(|p| p.timeframe)
        .max_by_key(|tf| tf.minutes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn row(close: f64, extra: Vec<Option<f64>>) -> BarRow {
        BarRow {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            symbol: crate::types::Symbol::new("BTC/USDT"),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            daily_vol_usdt: 1_000_000.0,
            extra,
        }
    }

    #[test]
    fn rsi_crossing_up_requires_prior_row() {
        let schema = Schema::new(vec!["RSI_14".to_string()]);
        let pred = Predicate {
            family: IndicatorFamily::Rsi { length: 14, check: ValueCheck::CrossingUp(30.0) },
            timeframe: None,
        };
        let curr = row(100.0, vec![Some(35.0)]);
        assert!(!pred.eval(&schema, &curr, None));

        let prev = row(99.0, vec![Some(25.0)]);
        assert!(pred.eval(&schema, &curr, Some(&prev)));
    }

    #[test]
    fn null_column_fails_predicate_without_panicking() {
        let schema = Schema::new(vec!["RSI_14".to_string()]);
        let pred = Predicate {
            family: IndicatorFamily::Rsi { length: 14, check: ValueCheck::LessThan(30.0) },
            timeframe: None,
        };
        let curr = row(100.0, vec![None]);
        assert!(!pred.eval(&schema, &curr, None));
    }

    #[test]
    fn bar_close_gate_blocks_non_base_timeframe() {
        let schema = Schema::new(vec!["RSI_14_1h".to_string(), "Bar_Close_1h".to_string()]);
        let pred = Predicate {
            family: IndicatorFamily::Rsi { length: 14, check: ValueCheck::LessThan(50.0) },
            timeframe: Some(Timeframe::H1),
        };
        let mut extra = vec![None; schema.len()];
        extra[schema.column_index("RSI_14_1h").unwrap()] = Some(20.0);
        extra[schema.column_index("Bar_Close_1h").unwrap()] = Some(0.0);
        let curr = row(100.0, extra.clone());
        assert!(!pred.eval(&schema, &curr, None));

        extra[schema.column_index("Bar_Close_1h").unwrap()] = Some(1.0);
        let curr = row(100.0, extra);
        assert!(pred.eval(&schema, &curr, None));
    }

    #[test]
    fn tradingview_buy_matches_strong_buy() {
        let schema = Schema::new(vec!["tv_tech_label".to_string()]);
        let pred = Predicate {
            family: IndicatorFamily::TradingView { rating: TvRating::Buy },
            timeframe: None,
        };
        let curr = row(100.0, vec![Some(encode_tv_rating(TvRating::StrongBuy))]);
        assert!(pred.eval(&schema, &curr, None));

        let pred_strict = Predicate {
            family: IndicatorFamily::TradingView { rating: TvRating::StrongBuy },
            timeframe: None,
        };
        let curr_plain_buy = row(100.0, vec![Some(encode_tv_rating(TvRating::Buy))]);
        assert!(!pred_strict.eval(&schema, &curr_plain_buy, None));
    }

    #[test]
    fn empty_predicate_list_is_true() {
        let schema = Schema::new(vec![]);
        let curr = row(100.0, vec![]);
        assert!(eval_all(&schema, &[], &curr, None));
    }
}
