//! Data Loader: per-instrument columnar table loading, projected down to
//! the columns the Schema Resolver actually asked for.
//!
//! Bounded-concurrency fan-out across instruments uses the same
//! `rayon::par_iter` + `indicatif::ProgressBar` idiom as other fan-out
//! jobs in this crate; here the unit of work is one instrument's table.

use chrono::{DateTime, NaiveDate, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use polars::prelude::*;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::types::{BarRow, Schema, Symbol};

const BASE_COLUMNS: &[&str] = &["timestamp", "open", "high", "low", "close", "volume"];

fn columnar_err(e: PolarsError) -> EngineError {
    EngineError::Columnar(e.to_string())
}

/// Load one instrument's table, filtered to `[start, end]` inclusive and
/// projected to exactly `schema`'s columns plus the base OHLCV set.
/// Columns named by `schema` but absent from the on-disk table resolve to
/// all-`None` — a missing optional column is never a fault.
pub fn load_instrument(
    cfg: &EngineConfig,
    symbol: &str,
    schema: &Schema,
    start: NaiveDate,
    end: NaiveDate,
) -> EngineResult<Vec<BarRow>> {
    let parquet_path = cfg.instrument_path(symbol, "parquet");
    let csv_path = cfg.instrument_path(symbol, "csv");

    let lf = if parquet_path.exists() {
        LazyFrame::scan_parquet(&parquet_path, ScanArgsParquet::default()).map_err(columnar_err)?
    } else if csv_path.exists() {
        LazyCsvReader::new(&csv_path)
            .with_has_header(true)
            .with_try_parse_dates(true)
            .finish()
            .map_err(columnar_err)?
    } else {
        return Err(EngineError::DataMissing {
            symbol: symbol.to_string(),
            detail: format!("no table at {} or {}", parquet_path.display(), csv_path.display()),
        });
    };

    let mut select_cols: Vec<String> = BASE_COLUMNS.iter().map(|s| s.to_string()).collect();
    for c in schema.columns() {
        if !select_cols.contains(c) {
            select_cols.push(c.clone());
        }
    }
    let present = lf.clone().collect_schema().map_err(columnar_err)?;
    let select_exprs: Vec<Expr> = select_cols
        .iter()
        .filter(|c| present.contains(c.as_str()) || BASE_COLUMNS.contains(&c.as_str()))
        .map(|c| col(c))
        .collect();

    let start_ts = start
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc();
    let end_ts = end
        .and_hms_opt(23, 59, 59)
        .expect("23:59:59 is always valid")
        .and_utc();

    let df = lf
        .select(&select_exprs)
        .filter(
            col("timestamp")
                .gt_eq(lit(start_ts.naive_utc()))
                .and(col("timestamp").lt_eq(lit(end_ts.naive_utc()))),
        )
        .sort(["timestamp"], Default::default())
        .unique(Some(vec!["timestamp".to_string()]), UniqueKeepStrategy::Last)
        .with_columns([(col("volume") * col("close")).alias("volume_in_usdt")])
        .with_columns([col("timestamp").dt().date().alias("_day")])
        .with_columns([col("volume_in_usdt").sum().over([col("_day")]).alias("daily_vol_usdt")])
        .collect()
        .map_err(columnar_err)?;

    rows_from_dataframe(&df, symbol, schema)
}

fn f64_column(df: &DataFrame, name: &str, height: usize) -> Vec<Option<f64>> {
    match df.column(name).ok().and_then(|s| s.f64().ok()) {
        Some(ca) => ca.into_iter().collect(),
        None => vec![None; height],
    }
}

fn rows_from_dataframe(df: &DataFrame, symbol: &str, schema: &Schema) -> EngineResult<Vec<BarRow>> {
    let height = df.height();
    let symbol = Symbol::new(symbol);

    let timestamps: Vec<DateTime<Utc>> = df
        .column("timestamp")
        .map_err(columnar_err)?
        .datetime()
        .map_err(columnar_err)?
        .as_datetime_iter()
        .map(|ndt| ndt.map(|d| d.and_utc()).unwrap_or_else(Utc::now))
        .collect();

    let open = f64_column(df, "open", height);
    let high = f64_column(df, "high", height);
    let low = f64_column(df, "low", height);
    let close = f64_column(df, "close", height);
    let volume = f64_column(df, "volume", height);
    let daily_vol_usdt = f64_column(df, "daily_vol_usdt", height);

    let extra_cols: Vec<Vec<Option<f64>>> = schema
        .columns()
        .iter()
        .map(|c| f64_column(df, c, height))
        .collect();

    let mut rows = Vec::with_capacity(height);
    for i in 0..height {
        let extra = extra_cols.iter().map(|col| col[i]).collect();
        rows.push(BarRow {
            timestamp: timestamps[i],
            symbol: symbol.clone(),
            open: open[i].unwrap_or(f64::NAN),
            high: high[i].unwrap_or(f64::NAN),
            low: low[i].unwrap_or(f64::NAN),
            close: close[i].unwrap_or(f64::NAN),
            volume: volume[i].unwrap_or(0.0),
            daily_vol_usdt: daily_vol_usdt[i].unwrap_or(0.0),
            extra,
        });
    }
    Ok(rows)
}

/// Load every instrument in `pairs`, fanning out across a bounded rayon
/// pool of at most `cfg.data_loader_workers` workers. Returns on the
/// first `DataMissing` error — a missing table is fatal for the whole job.
pub fn load_universe(
    cfg: &EngineConfig,
    pairs: &[String],
    schema: &Schema,
    start: NaiveDate,
    end: NaiveDate,
) -> EngineResult<Vec<(Symbol, Vec<BarRow>)>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cfg.data_loader_workers.max(1))
        .build()
        .expect("failed to build data loader thread pool");

    let progress = ProgressBar::new(pairs.len() as u64);
    if let Ok(style) = ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}") {
        progress.set_style(style);
    }

    let results: Vec<EngineResult<(Symbol, Vec<BarRow>)>> = pool.install(|| {
        pairs
            .par_iter()
            .map(|symbol| {
                let rows = load_instrument(cfg, symbol, schema, start, end)?;
                progress.inc(1);
                info!(symbol, bars = rows.len(), "loaded instrument table");
                Ok((Symbol::new(symbol.clone()), rows))
            })
            .collect()
    });
    progress.finish_and_clear();

    let mut loaded = Vec::with_capacity(results.len());
    for r in results {
        loaded.push(r?);
    }

    let empty_instruments: Vec<&str> = loaded
        .iter()
        .filter(|(_, rows)| rows.is_empty())
        .map(|(s, _)| s.as_str())
        .collect();
    if !empty_instruments.is_empty() {
        warn!(?empty_instruments, "no rows survived date filtering for these instruments");
    }

    Ok(loaded)
}

/// Merge per-instrument row vectors into one globally-sorted stream,
/// ordered by `(timestamp, symbol)` — the order the kernel and accountant
/// both rely on.
pub fn merge_sorted(per_instrument: Vec<(Symbol, Vec<BarRow>)>) -> Vec<BarRow> {
    let mut merged: Vec<BarRow> = per_instrument.into_iter().flat_map(|(_, rows)| rows).collect();
    merged.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.symbol.cmp(&b.symbol)));
    merged
}

#[cfg(test)]
pub mod fixtures {
    //! In-memory `BarRow` construction for tests (`tests/integration_tests.rs`),
    //! instead of round-tripping through files.
    use super::*;
    use chrono::Duration;

    pub fn flat_rows(symbol: &str, closes: &[f64], schema: &Schema, start: DateTime<Utc>) -> Vec<BarRow> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| BarRow {
                timestamp: start + Duration::minutes(i as i64),
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
}
