//! Timestamp normalization.
//!
//! Upstream mixes epoch seconds, epoch milliseconds and ISO-8601 strings (with or
//! without an offset, sometimes with a space instead of `T`). Everything we
//! emit is UTC with a literal `Z` suffix.

use std::borrow::Cow;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;

/// Epoch values above this magnitude are milliseconds.
const EPOCH_MS_THRESHOLD: f64 = 1e12;

pub fn format_utc(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn utc_now_iso() -> String {
    format_utc(Utc::now())
}

/// Normalize an upstream timestamp to ISO-8601 UTC.
///
/// Unrecognized non-empty strings pass through verbatim so display labels
/// are never lost. Null, empty and non-scalar input yields `None`.
pub fn to_iso8601_utc(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::Number(n) => n.as_f64().and_then(from_epoch).map(format_utc),
        Value::String(s) => normalize_str(s),
        _ => None,
    }
}

/// Parse an upstream timestamp into a `DateTime`, or `None` when it is not one
/// of the recognized encodings.
pub fn parse_utc(v: Option<&Value>) -> Option<DateTime<Utc>> {
    match v? {
        Value::Number(n) => n.as_f64().and_then(from_epoch),
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<f64>() {
                Ok(x) => from_epoch(x),
                Err(_) => parse_iso(s),
            }
        }
        _ => None,
    }
}

pub fn normalize_str(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(x) = trimmed.parse::<f64>() {
        if let Some(dt) = from_epoch(x) {
            return Some(format_utc(dt));
        }
    }
    match parse_iso(trimmed) {
        Some(dt) => Some(format_utc(dt)),
        None => Some(s.to_string()),
    }
}

/// Key for newest-first ordering. Output width varies (`...20Z` next to
/// `...20.500Z`), so anything that parses is re-rendered with nine fractional
/// digits before comparing; unparseable labels compare as written.
pub fn ordering_key(s: &str) -> Cow<'_, str> {
    match parse_iso(s.trim()) {
        Some(dt) => Cow::Owned(dt.to_rfc3339_opts(SecondsFormat::Nanos, true)),
        None => Cow::Borrowed(s),
    }
}

fn from_epoch(x: f64) -> Option<DateTime<Utc>> {
    if !x.is_finite() {
        return None;
    }
    let secs = if x.abs() > EPOCH_MS_THRESHOLD { x / 1000.0 } else { x };
    // Round to microseconds so float noise does not leak into the output.
    let micros = (secs * 1_000_000.0).round();
    if micros.abs() >= i64::MAX as f64 {
        return None;
    }
    let micros = micros as i64;
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos)
}

fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    let s = s.replacen(' ', "T", 1);

    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    // No offset: upstream means UTC.
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn epoch_millis_are_detected_by_magnitude() {
        assert_eq!(
            to_iso8601_utc(Some(&json!(1_700_000_000_000u64))).as_deref(),
            Some("2023-11-14T22:13:20Z")
        );
    }

    #[test]
    fn epoch_seconds_with_fraction() {
        assert_eq!(
            to_iso8601_utc(Some(&json!(1_700_000_000.5))).as_deref(),
            Some("2023-11-14T22:13:20.500Z")
        );
        assert_eq!(
            to_iso8601_utc(Some(&json!("1700000000"))).as_deref(),
            Some("2023-11-14T22:13:20Z")
        );
    }

    #[test]
    fn iso_variants_normalize_to_z() {
        for input in [
            "2024-01-02T03:04:05Z",
            "2024-01-02T03:04:05+00:00",
            "2024-01-02 03:04:05",
            "2024-01-02T05:04:05+02:00",
            "2024-01-02T03:04:05",
        ] {
            assert_eq!(
                normalize_str(input).as_deref(),
                Some("2024-01-02T03:04:05Z"),
                "{input}"
            );
        }
    }

    #[test]
    fn never_emits_plus_zero_offset() {
        let out = normalize_str("2024-01-02T03:04:05.123456+00:00").unwrap();
        assert_eq!(out, "2024-01-02T03:04:05.123456Z");
        assert!(!utc_now_iso().contains("+00:00"));
        assert!(utc_now_iso().ends_with('Z'));
    }

    #[test]
    fn ordering_key_is_fixed_width() {
        let whole = to_iso8601_utc(Some(&json!(1_700_000_000_000u64))).unwrap();
        let half = to_iso8601_utc(Some(&json!(1_700_000_000_500u64))).unwrap();
        assert_eq!(half, "2023-11-14T22:13:20.500Z");
        assert!(ordering_key(&half) > ordering_key(&whole));
        assert_eq!(ordering_key(&whole), "2023-11-14T22:13:20.000000000Z");
        assert_eq!(ordering_key("10/21 14:03:22"), "10/21 14:03:22");
    }

    #[test]
    fn labels_pass_through_and_empty_is_none() {
        assert_eq!(
            normalize_str("10/21 14:03:22").as_deref(),
            Some("10/21 14:03:22")
        );
        assert_eq!(to_iso8601_utc(Some(&json!(""))), None);
        assert_eq!(to_iso8601_utc(Some(&json!("   "))), None);
        assert_eq!(to_iso8601_utc(Some(&Value::Null)), None);
        assert_eq!(to_iso8601_utc(None), None);
        assert_eq!(to_iso8601_utc(Some(&json!(true))), None);
    }
}
