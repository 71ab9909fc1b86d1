//! Error taxonomy for the backtesting engine.
//!
//! Two kinds of failure exist in this crate: terminal errors
//! that abort the job before any simulation runs (`EngineError`), and
//! success-shaped outcomes that still need to short-circuit the rest of the
//! pipeline (`Outcome`, in `metrics.rs`). Predicate-level failures (null
//! columns, missing sub-parameters) are deliberately not part of either —
//! they resolve to `false` inside the evaluator and never propagate here.

use thiserror::Error;

/// Fatal, job-aborting failures. Surfaced immediately; no simulation runs.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("data missing for instrument {symbol}: {detail}")]
    DataMissing { symbol: String, detail: String },

    #[error("failed to read job payload: {0}")]
    PayloadParse(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("columnar data error: {0}")]
    Columnar(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
