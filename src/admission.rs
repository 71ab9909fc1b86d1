//! Admission Controller: at each timestamp barrier, decide which buffered
//! entry candidates actually open a deal.

use crate::types::BarRow;

/// Sort `candidates` ascending by close (lowest-priced instrument wins
/// ties) and admit up to `max_active_deals - global_active_deals` of them.
/// Returns the admitted subset in admission order; the rest are dropped
/// for this timestamp (their symbols simply re-evaluate entry on the next
/// bar).
pub fn admit(mut candidates: Vec<BarRow>, max_active_deals: u32, global_active_deals: u32) -> Vec<BarRow> {
    candidates.sort_by(|a, b| a.close.partial_cmp(&b.close).unwrap_or(std::cmp::Ordering::Equal));
    let slots = max_active_deals.saturating_sub(global_active_deals) as usize;
    candidates.truncate(slots);
    candidates
}
