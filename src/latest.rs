//! Stateless one-shot read path: fetch, normalize, reconcile, respond.

use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::config::DisplayConfig;
use crate::normalize::normalize_trade;
use crate::ordering::{dedup_by_id, sort_and_limit, sort_by_display_time};
use crate::reconcile::reconcile_positions;
use crate::timestamps::utc_now_iso;
use crate::types::{AccountSummary, NormalizedRecord};
use crate::upstream::{fetch_trades, Upstream, UpstreamError};

pub const STATUS_BAD_GATEWAY: u16 = 502;

#[derive(Debug, Clone, Serialize)]
pub struct LatestTradesDocument {
    pub fetched_at: String,
    /// The limit as requested; slicing floors it at one.
    pub limit: i64,
    pub count: usize,
    pub open_count: usize,
    pub closed_count: usize,
    pub trades: Vec<NormalizedRecord>,
    pub models: Vec<String>,
    pub symbols: Vec<String>,
    pub accounts: Vec<AccountSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Error)]
pub enum LatestError {
    /// The primary trades list could not be fetched; nothing useful to return.
    #[error("trades fetch failed: {0}")]
    Trades(#[from] UpstreamError),
}

impl LatestError {
    pub fn http_status(&self) -> u16 {
        STATUS_BAD_GATEWAY
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl From<&LatestError> for ErrorBody {
    fn from(e: &LatestError) -> Self {
        Self {
            error: e.to_string(),
        }
    }
}

/// `?limit=` handling: unparseable or absent means the configured default.
pub fn parse_limit(raw: Option<&str>, default: usize) -> i64 {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .unwrap_or(default as i64)
}

fn slice_limit(limit: i64) -> usize {
    usize::try_from(limit).unwrap_or(0).max(1)
}

/// Normalize a raw trades list: invalid entries and id-less records are
/// dropped, repeats keep their first occurrence.
pub fn normalize_trades(raw: &[serde_json::Value]) -> Vec<NormalizedRecord> {
    dedup_by_id(raw.iter().filter_map(normalize_trade).collect())
}

pub async fn latest_trades(
    upstream: &dyn Upstream,
    display: &DisplayConfig,
    limit: i64,
) -> Result<LatestTradesDocument, LatestError> {
    let raw = fetch_trades(upstream).await?;
    let trades = sort_and_limit(normalize_trades(&raw), slice_limit(limit));

    let reconciled = reconcile_positions(upstream, display.effective_position_limit()).await;

    // Trades go first so a closed trade wins over a position reusing its id.
    let mut combined = dedup_by_id(trades.into_iter().chain(reconciled.positions).collect());
    sort_by_display_time(&mut combined);

    let open_count = combined.iter().filter(|r| r.is_open()).count();
    let models: BTreeSet<String> = combined.iter().filter_map(|r| r.model_id.clone()).collect();
    let symbols: BTreeSet<String> = combined.iter().filter_map(|r| r.symbol.clone()).collect();

    info!(
        trades = combined.len() - open_count,
        positions = open_count,
        accounts = reconciled.accounts.len(),
        diagnostics = reconciled.errors.len(),
        "latest trades assembled"
    );

    Ok(LatestTradesDocument {
        fetched_at: utc_now_iso(),
        limit,
        count: combined.len(),
        open_count,
        closed_count: combined.len() - open_count,
        trades: combined,
        models: models.into_iter().collect(),
        symbols: symbols.into_iter().collect(),
        accounts: reconciled.accounts,
        errors: reconciled.errors,
    })
}
