//! Upstream record shapes -> `NormalizedRecord`.
//!
//! Trades, open positions and the positions nested in account totals all
//! use slightly different field names. Missing nested objects (e.g. no
//! `exit_plan`) are treated as empty.

use serde_json::{Map, Value};

use crate::json_util::{coerce_f64, first_scalar, scalar_string};
use crate::ordering::synthesize_id;
use crate::timestamps::{normalize_str, to_iso8601_utc, utc_now_iso};
use crate::types::{AccountSummary, NormalizedRecord, RecordEvent, RecordStatus};

const TRADE_ID_KEYS: [&str; 2] = ["trade_id", "id"];
const POSITION_ID_KEYS: [&str; 4] = ["position_id", "id", "entry_oid", "oid"];

/// `(normalized time, display label)` for a `<prefix>_time` / `<prefix>_human_time` pair.
fn time_pair(obj: &Map<String, Value>, prefix: &str) -> (Option<String>, Option<String>) {
    let label = scalar_string(obj.get(&format!("{prefix}_human_time")));
    let time = to_iso8601_utc(obj.get(&format!("{prefix}_time")))
        .or_else(|| label.as_deref().and_then(normalize_str));
    (time, label)
}

fn first_f64(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| coerce_f64(obj.get(*k)))
}

fn plan_f64(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    obj.get("exit_plan")
        .and_then(Value::as_object)
        .and_then(|plan| coerce_f64(plan.get(key)))
        .or_else(|| coerce_f64(obj.get(key)))
}

/// Normalize one entry of the `/trades` list. Returns `None` for non-objects
/// and for records no id can be derived for.
pub fn normalize_trade(raw: &Value) -> Option<NormalizedRecord> {
    let obj = raw.as_object()?;

    let model_id = scalar_string(obj.get("model_id"));
    let symbol = scalar_string(obj.get("symbol"));
    let (entry_time, entry_human_time) = time_pair(obj, "entry");
    let (exit_time, exit_human_time) = time_pair(obj, "exit");

    let id = first_scalar(obj, &TRADE_ID_KEYS).or_else(|| {
        synthesize_id(
            model_id.as_deref(),
            symbol.as_deref(),
            entry_time.as_deref().or(entry_human_time.as_deref()),
        )
    })?;

    let (status, event) = if exit_time.is_some() {
        (RecordStatus::Closed, RecordEvent::TradeClosed)
    } else {
        (RecordStatus::ClosedPending, RecordEvent::TradeRecord)
    };
    // Closed trades order by when they closed; still-settling ones by entry.
    let display_time = exit_time.clone().or_else(|| entry_time.clone());

    let raw_leverage = obj.get("leverage").filter(|v| !v.is_null()).cloned();

    Some(NormalizedRecord {
        id,
        model_id,
        symbol,
        side: scalar_string(obj.get("side")),
        leverage: coerce_f64(raw_leverage.as_ref()),
        raw_leverage,
        quantity: coerce_f64(obj.get("quantity")),
        entry_price: coerce_f64(obj.get("entry_price")),
        exit_price: coerce_f64(obj.get("exit_price")),
        current_price: coerce_f64(obj.get("current_price")),
        profit_target: plan_f64(obj, "profit_target"),
        stop_loss: plan_f64(obj, "stop_loss"),
        realized_net_pnl: first_f64(obj, &["realized_net_pnl", "realized_pnl"]),
        unrealized_pnl: coerce_f64(obj.get("unrealized_pnl")),
        confidence: coerce_f64(obj.get("confidence")),
        entry_time,
        exit_time,
        entry_human_time,
        exit_human_time,
        display_time,
        status,
        event,
    })
}

/// Normalize one open position.
///
/// `fallback_hint` is a timestamp from the enclosing payload (e.g. the
/// account snapshot time) used when the position carries no entry time.
/// With neither, the record is stamped with the current time so it still
/// sorts near the top instead of after every dated record.
pub fn normalize_position(raw: &Value, fallback_hint: Option<&Value>) -> Option<NormalizedRecord> {
    let obj = raw.as_object()?;

    let model_id = scalar_string(obj.get("model_id"));
    let symbol = scalar_string(obj.get("symbol"));
    let (entry_time, entry_human_time) = time_pair(obj, "entry");

    let id = first_scalar(obj, &POSITION_ID_KEYS).or_else(|| {
        synthesize_id(
            model_id.as_deref(),
            symbol.as_deref(),
            entry_time.as_deref().or(entry_human_time.as_deref()),
        )
    })?;

    let display_time = entry_time
        .clone()
        .or_else(|| to_iso8601_utc(fallback_hint))
        .or_else(|| Some(utc_now_iso()));

    let raw_leverage = obj.get("leverage").filter(|v| !v.is_null()).cloned();

    Some(NormalizedRecord {
        id,
        model_id,
        symbol,
        side: scalar_string(obj.get("side")),
        leverage: coerce_f64(raw_leverage.as_ref()),
        raw_leverage,
        quantity: coerce_f64(obj.get("quantity")),
        entry_price: coerce_f64(obj.get("entry_price")),
        exit_price: None,
        current_price: coerce_f64(obj.get("current_price")),
        profit_target: plan_f64(obj, "profit_target"),
        stop_loss: plan_f64(obj, "stop_loss"),
        realized_net_pnl: first_f64(obj, &["realized_net_pnl", "closed_pnl"]),
        unrealized_pnl: coerce_f64(obj.get("unrealized_pnl")),
        confidence: coerce_f64(obj.get("confidence")),
        entry_time,
        exit_time: None,
        entry_human_time,
        exit_human_time: None,
        display_time,
        status: RecordStatus::Open,
        event: RecordEvent::PositionOpen,
    })
}

pub fn account_model_id(account: &Map<String, Value>) -> Option<String> {
    first_scalar(account, &["model_id", "model"])
}

/// Flatten the per-symbol `positions` mapping of one account-totals entry.
///
/// Nested positions usually omit `symbol` and `model_id`; both are injected
/// from the mapping key and the account before normalizing, and the account
/// timestamp is passed as the fallback time hint.
pub fn account_positions(account: &Value) -> Vec<NormalizedRecord> {
    let Some(obj) = account.as_object() else {
        return Vec::new();
    };
    let model_id = account_model_id(obj);
    let hint = obj.get("timestamp").or_else(|| obj.get("last_updated"));

    let nested: Vec<(Option<&str>, &Value)> = match obj.get("positions") {
        Some(Value::Object(by_symbol)) => by_symbol
            .iter()
            .map(|(symbol, pos)| (Some(symbol.as_str()), pos))
            .collect(),
        Some(Value::Array(list)) => list.iter().map(|pos| (None, pos)).collect(),
        _ => Vec::new(),
    };

    nested
        .into_iter()
        .filter_map(|(symbol, pos)| {
            let mut pos = pos.as_object()?.clone();
            if let Some(symbol) = symbol {
                inject_default(&mut pos, "symbol", symbol);
            }
            if let Some(model_id) = model_id.as_deref() {
                inject_default(&mut pos, "model_id", model_id);
            }
            normalize_position(&Value::Object(pos), hint)
        })
        .collect()
}

fn inject_default(obj: &mut Map<String, Value>, key: &str, value: &str) {
    let missing = obj.get(key).map_or(true, |v| scalar_string(Some(v)).is_none());
    if missing {
        obj.insert(key.to_string(), Value::String(value.to_string()));
    }
}

pub fn summarize_account(account: &Value) -> Option<AccountSummary> {
    let obj = account.as_object()?;
    let model_id = account_model_id(obj)?;
    let position_count = match obj.get("positions") {
        Some(Value::Object(m)) => m.len(),
        Some(Value::Array(v)) => v.len(),
        _ => 0,
    };
    Some(AccountSummary {
        model_id,
        timestamp: to_iso8601_utc(obj.get("timestamp").or_else(|| obj.get("last_updated"))),
        dollar_equity: first_f64(obj, &["dollar_equity", "equity"]),
        realized_pnl: first_f64(obj, &["realized_pnl", "realized_net_pnl"]),
        total_unrealized_pnl: first_f64(obj, &["total_unrealized_pnl", "unrealized_pnl"]),
        position_count,
    })
}
