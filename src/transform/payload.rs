//! Typed access to raw order payloads.
//!
//! Source records are arbitrary JSON. Every field read goes through the
//! helpers here, which return `None` on a missing or ill-typed value instead
//! of failing, so one malformed field never takes the whole record down.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::checkpoint::parse_timestamp;

/// One order as returned by the source API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawOrder(Value);

impl RawOrder {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn id(&self) -> Option<i64> {
        self.field("id").and_then(as_i64)
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.field(key).and_then(as_i64)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.field(key).and_then(as_f64)
    }

    pub fn text(&self, key: &str) -> Option<String> {
        self.field(key).and_then(as_text)
    }

    pub fn timestamp(&self, key: &str) -> Option<DateTime<Utc>> {
        self.field(key).and_then(as_timestamp)
    }

    /// Elements of an array field; empty when absent or not an array.
    pub fn list(&self, key: &str) -> &[Value] {
        self.field(key)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// A string field of a nested object, e.g. `billing.email`.
    pub fn nested_text(&self, object: &str, key: &str) -> Option<String> {
        self.field(object)
            .and_then(|o| o.get(key))
            .and_then(as_text)
    }
}

/// Integer from a JSON number or numeric string.
///
/// Floats with a fractional part are rejected.
pub fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && f.fract() == 0.0)
                    .map(|f| f as i64)
            })
        }
        _ => None,
    }
}

/// Finite float from a JSON number or numeric string.
pub fn as_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

/// Non-empty string. Numbers are rendered as text.
pub fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Timestamp in the source's ISO-8601 dialect. Offset-less values are UTC.
pub fn as_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value.as_str().and_then(parse_timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numbers_from_strings_and_numbers() {
        assert_eq!(as_f64(&json!("49.99")), Some(49.99));
        assert_eq!(as_f64(&json!(5)), Some(5.0));
        assert_eq!(as_f64(&json!("abc")), None);
        assert_eq!(as_f64(&json!("NaN")), None);
        assert_eq!(as_f64(&json!(null)), None);
    }

    #[test]
    fn test_integers_reject_fractions() {
        assert_eq!(as_i64(&json!("42")), Some(42));
        assert_eq!(as_i64(&json!(2.0)), Some(2));
        assert_eq!(as_i64(&json!("2.5")), None);
        assert_eq!(as_i64(&json!(true)), None);
    }

    #[test]
    fn test_text_skips_empty() {
        assert_eq!(as_text(&json!("")), None);
        assert_eq!(as_text(&json!("x")), Some("x".to_string()));
        assert_eq!(as_text(&json!(12)), Some("12".to_string()));
    }

    #[test]
    fn test_raw_order_accessors() {
        let order = RawOrder::new(json!({
            "id": "17",
            "total": "10.50",
            "billing": {"email": "a@b.com"},
            "line_items": [{"sku": "X"}],
            "coupon_lines": "not a list",
            "date_paid": null,
        }));

        assert_eq!(order.id(), Some(17));
        assert_eq!(order.number("total"), Some(10.5));
        assert_eq!(order.nested_text("billing", "email").as_deref(), Some("a@b.com"));
        assert_eq!(order.list("line_items").len(), 1);
        assert!(order.list("coupon_lines").is_empty());
        assert_eq!(order.timestamp("date_paid"), None);
    }

    #[test]
    fn test_unparseable_dates_are_none() {
        let order = RawOrder::new(json!({"date_created": "not a date"}));
        assert_eq!(order.timestamp("date_created"), None);
    }
}
