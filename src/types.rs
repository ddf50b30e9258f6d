use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Open,
    Closed,
    ClosedPending,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordEvent {
    PositionOpen,
    TradeClosed,
    TradeRecord,
}

/// One trade or open position in the shape the ticker frontend consumes.
///
/// Every numeric field is optional: upstream values that fail to coerce are
/// carried as `null`, never as an error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub id: String,
    pub model_id: Option<String>,
    pub symbol: Option<String>,
    pub side: Option<String>,
    pub leverage: Option<f64>,
    /// The leverage exactly as upstream sent it (e.g. `"20x"`).
    pub raw_leverage: Option<Value>,
    pub quantity: Option<f64>,
    pub entry_price: Option<f64>,
    pub exit_price: Option<f64>,
    pub current_price: Option<f64>,
    pub profit_target: Option<f64>,
    pub stop_loss: Option<f64>,
    pub realized_net_pnl: Option<f64>,
    pub unrealized_pnl: Option<f64>,
    pub confidence: Option<f64>,
    pub entry_time: Option<String>,
    pub exit_time: Option<String>,
    pub entry_human_time: Option<String>,
    pub exit_human_time: Option<String>,
    /// Ordering key; see `ordering::sort_by_display_time`.
    pub display_time: Option<String>,
    pub status: RecordStatus,
    pub event: RecordEvent,
}

impl NormalizedRecord {
    pub fn is_open(&self) -> bool {
        self.status == RecordStatus::Open
    }
}

/// Latest account-level totals for one model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub model_id: String,
    pub timestamp: Option<String>,
    pub dollar_equity: Option<f64>,
    pub realized_pnl: Option<f64>,
    pub total_unrealized_pnl: Option<f64>,
    pub position_count: usize,
}
