//! The Schema Resolver: derives the minimal set of column
//! names a job actually needs from its predicate lists, once, before any
//! data is loaded. The Data Loader then projects the indicator store down
//! to exactly this set instead of reading every column on disk.

use crate::predicate::Predicate;
use crate::types::{Schema, Timeframe};
use std::collections::BTreeSet;

/// Every predicate list a job can reference an indicator from: deal entry,
/// each safety-order rung's own trigger conditions (rungs may override the
/// default entry conditions), and exit conditions.
pub struct PredicateSources<'a> {
    pub entry: &'a [Predicate],
    pub safety_orders: &'a [Vec<Predicate>],
    pub exit: &'a [Predicate],
}

/// Resolve the minimal `Schema` for this job: one column per distinct
/// indicator/timeframe combination referenced anywhere in `sources`, plus
/// a `close_<t>` mirror and a `Bar_Close_<t>` flag for every non-base
/// timeframe any predicate refers to.
pub fn resolve(sources: &PredicateSources<'_>) -> Schema {
    let mut columns: BTreeSet<String> = BTreeSet::new();
    let mut timeframes: BTreeSet<Timeframe> = BTreeSet::new();

    let mut visit = |predicates: &[Predicate]| {
        for p in predicates {
            columns.extend(p.required_columns());
            if let Some(tf) = p.timeframe {
                timeframes.insert(tf);
            }
        }
    };

    visit(sources.entry);
    for rung in sources.safety_orders {
        visit(rung);
    }
    visit(sources.exit);

    for tf in timeframes {
        columns.insert(format!("close_{}", tf.suffix()));
        columns.insert(format!("Bar_Close_{}", tf.suffix()));
    }

    Schema::new(columns.into_iter().collect())
}
