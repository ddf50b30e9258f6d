use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoercionError {
    #[error("value is missing or null")]
    Missing,
    #[error("value is not numeric: {0}")]
    NotNumeric(String),
    #[error("value is not finite")]
    NotFinite,
}

/// Parse a JSON number or numeric string into a finite `f64`.
pub fn parse_number(v: Option<&Value>) -> Result<f64, CoercionError> {
    let v = match v {
        None | Some(Value::Null) => return Err(CoercionError::Missing),
        Some(v) => v,
    };
    let parsed = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(x) if x.is_finite() => Ok(x),
        Some(_) => Err(CoercionError::NotFinite),
        None => Err(CoercionError::NotNumeric(v.to_string())),
    }
}

/// Upstream numbers are advisory: anything unparseable becomes `None`.
pub fn coerce_f64(v: Option<&Value>) -> Option<f64> {
    parse_number(v).ok()
}

/// Stringify a scalar field (ids arrive as numbers or strings). Empty strings,
/// nulls, booleans and containers yield `None`.
pub fn scalar_string(v: Option<&Value>) -> Option<String> {
    let s = match v? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// First non-empty scalar among `keys`, in order.
pub fn first_scalar(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| scalar_string(obj.get(*k)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_and_numeric_strings_parse() {
        assert_eq!(coerce_f64(Some(&json!(2.5))), Some(2.5));
        assert_eq!(coerce_f64(Some(&json!("  10 "))), Some(10.0));
        assert_eq!(coerce_f64(Some(&json!(-3))), Some(-3.0));
    }

    #[test]
    fn garbage_collapses_to_none() {
        assert_eq!(coerce_f64(None), None);
        assert_eq!(coerce_f64(Some(&Value::Null)), None);
        assert_eq!(coerce_f64(Some(&json!("20x"))), None);
        assert_eq!(coerce_f64(Some(&json!(true))), None);
        assert_eq!(coerce_f64(Some(&json!({"a": 1}))), None);
        assert_eq!(coerce_f64(Some(&json!("NaN"))), None);
        assert_eq!(
            parse_number(Some(&json!("inf"))),
            Err(CoercionError::NotFinite)
        );
    }

    #[test]
    fn scalar_strings() {
        assert_eq!(scalar_string(Some(&json!(42))), Some("42".to_string()));
        assert_eq!(scalar_string(Some(&json!(" abc "))), Some("abc".to_string()));
        assert_eq!(scalar_string(Some(&json!(""))), None);
        assert_eq!(scalar_string(Some(&json!(false))), None);
    }
}
