//! Record shapes on both sides of the sync.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// CRM property name to value. Null values are never sent.
pub type PropertyMap = Map<String, Value>;

/// One ERP entity instance as returned by the OData API.
///
/// Field names and value types are whatever the ERP sends; accessors coerce
/// the common shapes (numbers sent as strings, nulls for absent values).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRecord(Map<String, Value>);

impl SourceRecord {
    #[must_use]
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Raw value of a field. Null counts as absent.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field).filter(|v| !v.is_null())
    }

    /// Trimmed, non-empty string value.
    #[must_use]
    pub fn str(&self, field: &str) -> Option<&str> {
        self.get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Integer value. Accepts integral numbers and numeric strings.
    #[must_use]
    pub fn int(&self, field: &str) -> Option<i64> {
        match self.get(field)? {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Decimal value. Accepts numbers and numeric strings.
    #[must_use]
    pub fn float(&self, field: &str) -> Option<f64> {
        match self.get(field)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean flag, `default` when absent or not a boolean.
    #[must_use]
    pub fn flag_or(&self, field: &str, default: bool) -> bool {
        self.get(field).and_then(Value::as_bool).unwrap_or(default)
    }

    /// Boolean flag, false when absent.
    #[inline]
    #[must_use]
    pub fn flag(&self, field: &str) -> bool {
        self.flag_or(field, false)
    }

    /// Identifier-like value rendered as a string (numbers or strings).
    #[must_use]
    pub fn key(&self, field: &str) -> Option<String> {
        match self.get(field)? {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            _ => None,
        }
    }

    /// Nested records from an expanded child collection.
    #[must_use]
    pub fn children(&self, field: &str) -> Vec<SourceRecord> {
        match self.get(field) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_object().cloned().map(SourceRecord))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// A copy of this record without the named child collection.
    ///
    /// Used to keep failed-record reports small.
    #[must_use]
    pub fn without(&self, field: &str) -> SourceRecord {
        let mut fields = self.0.clone();
        fields.remove(field);
        SourceRecord(fields)
    }

    #[must_use]
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for SourceRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// A CRM object: destination-assigned id plus its properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DestinationRecord {
    pub id: String,
    #[serde(default)]
    pub properties: PropertyMap,
}

impl DestinationRecord {
    /// Non-empty string property.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> SourceRecord {
        serde_json::from_value(value).expect("source record")
    }

    #[test]
    fn nulls_and_blanks_are_absent() {
        let r = record(json!({"Name": null, "City": "  ", "State": " WA "}));
        assert!(r.get("Name").is_none());
        assert!(r.str("City").is_none());
        assert_eq!(r.str("State"), Some("WA"));
    }

    #[test]
    fn numeric_accessors_accept_strings() {
        let r = record(json!({"CustNum": "42", "QuoteNum": 7, "Amt": "12.50", "Whole": 3.0}));
        assert_eq!(r.int("CustNum"), Some(42));
        assert_eq!(r.int("QuoteNum"), Some(7));
        assert_eq!(r.int("Whole"), Some(3));
        assert_eq!(r.float("Amt"), Some(12.5));
        assert_eq!(r.int("Amt"), None);
    }

    #[test]
    fn flags_default_when_missing() {
        let r = record(json!({"VoidOrder": true, "OpenOrder": null}));
        assert!(r.flag("VoidOrder"));
        assert!(!r.flag("OrderHeld"));
        assert!(r.flag_or("OpenOrder", true));
    }

    #[test]
    fn key_renders_numbers_and_strings() {
        let r = record(json!({"CustNum": 1001, "PartNum": " ABC-1 ", "Blank": ""}));
        assert_eq!(r.key("CustNum").as_deref(), Some("1001"));
        assert_eq!(r.key("PartNum").as_deref(), Some("ABC-1"));
        assert_eq!(r.key("Blank"), None);
    }

    #[test]
    fn children_reads_expanded_collections() {
        let r = record(json!({
            "QuoteNum": 1,
            "QuoteDtls": [{"QuoteLine": 1}, {"QuoteLine": 2}, "junk"]
        }));
        let lines = r.children("QuoteDtls");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].int("QuoteLine"), Some(2));
        assert!(r.without("QuoteDtls").get("QuoteDtls").is_none());
        assert!(r.children("OrderDtls").is_empty());
    }

    #[test]
    fn destination_property_ignores_empty_values() {
        let rec: DestinationRecord = serde_json::from_value(json!({
            "id": "9",
            "properties": {"dealstage": "quote_sent", "pipeline": "", "amount": null}
        }))
        .expect("destination record");
        assert_eq!(rec.property("dealstage"), Some("quote_sent"));
        assert_eq!(rec.property("pipeline"), None);
        assert_eq!(rec.property("amount"), None);
    }
}
