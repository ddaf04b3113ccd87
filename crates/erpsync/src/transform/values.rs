//! Value conversions between ERP and CRM representations.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use uuid::Uuid;

/// Convert an ERP date/datetime string to epoch milliseconds.
///
/// Accepts RFC 3339 with an offset, naive ISO datetimes (assumed UTC), and
/// plain dates (midnight UTC). Anything else is `None`.
#[must_use]
pub fn to_epoch_millis(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.timestamp_millis());
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(Utc.from_utc_datetime(&naive).timestamp_millis());
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive).timestamp_millis())
}

/// Midnight UTC of the given instant, in epoch milliseconds.
///
/// CRM date pickers only accept midnight timestamps.
#[must_use]
pub fn midnight_millis(at: DateTime<Utc>) -> i64 {
    match at.date_naive().and_hms_opt(0, 0, 0) {
        Some(naive) => Utc.from_utc_datetime(&naive).timestamp_millis(),
        None => at.timestamp_millis(),
    }
}

/// Normalize an ERP GUID to lowercase hyphenated form.
///
/// Values that are not GUIDs are passed through trimmed.
#[must_use]
pub fn normalize_guid(value: &str) -> String {
    let value = value.trim();
    match Uuid::parse_str(value.trim_matches(|c| c == '{' || c == '}')) {
        Ok(uuid) => uuid.hyphenated().to_string(),
        Err(_) => value.to_string(),
    }
}

/// Normalize a phone number to E.164, assuming North America without a
/// country code.
///
/// Numbers that cannot be normalized are returned trimmed so nothing is lost.
#[must_use]
pub fn normalize_phone(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    // Drop extensions ("x123", "ext. 123", "#123").
    let lowered = value.to_ascii_lowercase();
    let main = lowered.split(['x', '#']).next().unwrap_or_default();

    let international = main.trim_start().starts_with('+');
    let digits: String = main.chars().filter(char::is_ascii_digit).collect();

    let normalized = match digits.len() {
        _ if international && (8..=15).contains(&digits.len()) => Some(format!("+{digits}")),
        10 => Some(format!("+1{digits}")),
        11 if digits.starts_with('1') => Some(format!("+{digits}")),
        _ => None,
    };

    Some(normalized.unwrap_or_else(|| value.to_string()))
}

/// Render a number without a trailing `.0` for whole values.
#[must_use]
pub fn number(value: f64) -> serde_json::Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        serde_json::Value::from(value as i64)
    } else {
        serde_json::Value::from(value)
    }
}
