use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use crate::normalize::{account_model_id, account_positions, normalize_position, summarize_account};
use crate::ordering::sort_and_limit;
use crate::timestamps::parse_utc;
use crate::types::{AccountSummary, NormalizedRecord};
use crate::upstream::{fetch_account_totals, fetch_positions, Upstream, PATH_POSITIONS};

#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// Union of both sources, deduplicated by id, sorted and limited.
    pub positions: Vec<NormalizedRecord>,
    /// Latest account totals per model, ordered by model id.
    pub accounts: Vec<AccountSummary>,
    /// One entry per failed fetch. Never fatal.
    pub errors: Vec<String>,
}

/// Positions keyed by id in first-seen order. Later inserts of a known id are ignored.
#[derive(Default)]
struct PositionIndex {
    by_id: HashMap<String, usize>,
    records: Vec<NormalizedRecord>,
}

impl PositionIndex {
    fn insert_if_absent(&mut self, r: NormalizedRecord) -> bool {
        if self.by_id.contains_key(&r.id) {
            return false;
        }
        self.by_id.insert(r.id.clone(), self.records.len());
        self.records.push(r);
        true
    }
}

/// Merge the open-positions endpoint with the positions nested in account
/// totals. Primary ids are never overwritten; the fallback only fills gaps.
pub async fn reconcile_positions(upstream: &dyn Upstream, positions_limit: usize) -> ReconcileOutcome {
    let mut out = ReconcileOutcome::default();
    let mut index = PositionIndex::default();

    let limited_path = format!("{PATH_POSITIONS}?limit={}", positions_limit.max(1));
    let mut primary = None;
    for path in [limited_path.as_str(), PATH_POSITIONS] {
        match fetch_positions(upstream, path).await {
            Ok(list) => {
                primary = Some(list);
                break;
            }
            Err(e) => {
                warn!(error = %e, %path, "positions fetch failed");
                out.errors.push(format!("positions: {e}"));
            }
        }
    }
    for raw in primary.iter().flatten() {
        let hint = raw.get("timestamp").or_else(|| raw.get("last_updated"));
        if let Some(r) = normalize_position(raw, hint) {
            index.insert_if_absent(r);
        }
    }

    match fetch_account_totals(upstream).await {
        Ok(accounts) => {
            let latest = latest_per_model(accounts);
            for account in &latest {
                for r in account_positions(account) {
                    index.insert_if_absent(r);
                }
            }
            let mut summaries: Vec<AccountSummary> =
                latest.iter().filter_map(summarize_account).collect();
            summaries.sort_by(|a, b| a.model_id.cmp(&b.model_id));
            out.accounts = summaries;
        }
        Err(e) => {
            warn!(error = %e, "account totals fetch failed");
            out.errors.push(format!("account-totals: {e}"));
        }
    }

    out.positions = sort_and_limit(index.records, positions_limit);
    out
}

/// Account totals may hold a time series per model; keep the newest entry of
/// each. Entries without a model id are kept as-is. On equal or missing
/// timestamps the later entry in the list wins.
fn latest_per_model(accounts: Vec<Value>) -> Vec<Value> {
    let mut anonymous: Vec<Value> = Vec::new();
    let mut order: Vec<String> = Vec::new();
    let mut best: HashMap<String, (Option<DateTime<Utc>>, Value)> = HashMap::new();

    for account in accounts {
        let Some(obj) = account.as_object() else {
            continue;
        };
        let Some(model_id) = account_model_id(obj) else {
            anonymous.push(account);
            continue;
        };
        let ts = parse_utc(obj.get("timestamp").or_else(|| obj.get("last_updated")));
        let replace = match best.get(&model_id) {
            Some((cur, _)) => !newer(*cur, ts),
            None => {
                order.push(model_id.clone());
                true
            }
        };
        if replace {
            best.insert(model_id, (ts, account));
        }
    }

    order
        .into_iter()
        .filter_map(|m| best.remove(&m).map(|(_, v)| v))
        .chain(anonymous)
        .collect()
}

/// True when the current best is strictly newer than the candidate.
fn newer(current: Option<DateTime<Utc>>, candidate: Option<DateTime<Utc>>) -> bool {
    match (current, candidate) {
        (Some(c), Some(n)) => c > n,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn latest_snapshot_per_model_wins() {
        let accounts = vec![
            json!({"model_id": "a", "timestamp": 200, "positions": {"BTC": {"id": "new"}}}),
            json!({"model_id": "a", "timestamp": 100, "positions": {"BTC": {"id": "old"}}}),
            json!({"model_id": "b", "timestamp": 50}),
            json!({"positions": {"ETH": {"id": "anon"}}}),
        ];
        let latest = latest_per_model(accounts);
        assert_eq!(latest.len(), 3);
        assert_eq!(latest[0]["timestamp"], json!(200));
        assert_eq!(latest[1]["model_id"], json!("b"));
        assert!(latest[2].get("model_id").is_none());
    }

    #[test]
    fn undated_duplicate_replaces_undated() {
        let accounts = vec![
            json!({"model_id": "a", "n": 1}),
            json!({"model_id": "a", "n": 2}),
        ];
        let latest = latest_per_model(accounts);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0]["n"], json!(2));
    }
}
