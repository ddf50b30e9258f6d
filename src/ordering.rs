use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::timestamps::ordering_key;
use crate::types::NormalizedRecord;

/// Build an id for a record upstream sent without one.
///
/// Known limitation: two open positions sharing model, symbol and a missing
/// timestamp produce the same id, and the later one is dropped by dedup.
pub fn synthesize_id(
    model_id: Option<&str>,
    symbol: Option<&str>,
    time_part: Option<&str>,
) -> Option<String> {
    let model_id = model_id.unwrap_or_default();
    let symbol = symbol.unwrap_or_default();
    if model_id.is_empty() && symbol.is_empty() {
        return None;
    }
    Some(format!(
        "{model_id}-{symbol}-{}",
        time_part.unwrap_or_default()
    ))
}

fn sort_key(r: &NormalizedRecord) -> Option<Cow<'_, str>> {
    r.display_time
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(ordering_key)
}

/// Newest first; undated records go last in their input order.
pub fn cmp_display_time(a: &NormalizedRecord, b: &NormalizedRecord) -> Ordering {
    match (sort_key(a), sort_key(b)) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

pub fn sort_by_display_time(records: &mut [NormalizedRecord]) {
    // `sort_by` is stable, which keeps ties in input order.
    records.sort_by(cmp_display_time);
}

/// Sort, then keep at most `limit` records (never fewer than one slot).
pub fn sort_and_limit(mut records: Vec<NormalizedRecord>, limit: usize) -> Vec<NormalizedRecord> {
    sort_by_display_time(&mut records);
    records.truncate(limit.max(1));
    records
}

/// Drop records with an empty id and any repeat of an id already seen.
pub fn dedup_by_id(records: Vec<NormalizedRecord>) -> Vec<NormalizedRecord> {
    let mut seen: HashSet<String> = HashSet::with_capacity(records.len());
    records
        .into_iter()
        .filter(|r| !r.id.is_empty() && seen.insert(r.id.clone()))
        .collect()
}
