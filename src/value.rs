use std::cmp::Ordering;

use serde_json::Value as JsonValue;

/// Comparable view of a JSON field used for filtering and sorting.
///
/// Values of different kinds order the way a document database orders mixed
/// fields: null, numbers, strings, objects, arrays, booleans, then dates.
/// Strings that look like ISO dates are compared as millisecond timestamps,
/// so `"2024-01-15"` and `"2024-01-15T00:00:00Z"` are equal.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Null,
    Number(f64),
    String(String),
    /// Objects and arrays compare by their serialized text within their kind.
    Object(String),
    Array(String),
    Boolean(bool),
    DateTime(i64),
}

impl FieldValue {
    fn rank(&self) -> u8 {
        match self {
            FieldValue::Null => 0,
            FieldValue::Number(_) => 1,
            FieldValue::String(_) => 2,
            FieldValue::Object(_) => 3,
            FieldValue::Array(_) => 4,
            FieldValue::Boolean(_) => 5,
            FieldValue::DateTime(_) => 6,
        }
    }
}

impl Ord for FieldValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (FieldValue::Number(a), FieldValue::Number(b)) => a.total_cmp(b),
            (FieldValue::String(a), FieldValue::String(b))
            | (FieldValue::Object(a), FieldValue::Object(b))
            | (FieldValue::Array(a), FieldValue::Array(b)) => a.cmp(b),
            (FieldValue::Boolean(a), FieldValue::Boolean(b)) => a.cmp(b),
            (FieldValue::DateTime(a), FieldValue::DateTime(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for FieldValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for FieldValue {}

impl FieldValue {
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => FieldValue::Null,
            JsonValue::Bool(b) => FieldValue::Boolean(*b),
            JsonValue::Number(n) => n.as_f64().map_or(FieldValue::Null, FieldValue::Number),
            JsonValue::String(s) => Self::parse_string(s),
            JsonValue::Object(_) => FieldValue::Object(value.to_string()),
            JsonValue::Array(_) => FieldValue::Array(value.to_string()),
        }
    }

    pub fn parse_string(s: &str) -> Self {
        // Only strings shaped like YYYY-MM-... are worth a date parse.
        let b = s.as_bytes();
        let date_like = b.len() >= 10
            && b[..4].iter().all(u8::is_ascii_digit)
            && b[4] == b'-'
            && b[5..7].iter().all(u8::is_ascii_digit);
        if !date_like {
            return FieldValue::String(s.to_string());
        }

        if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
            return FieldValue::DateTime(dt.timestamp_millis());
        }
        for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
            if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
                return FieldValue::DateTime(dt.and_utc().timestamp_millis());
            }
        }
        if let Ok(d) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            if let Some(dt) = d.and_hms_opt(0, 0, 0) {
                return FieldValue::DateTime(dt.and_utc().timestamp_millis());
            }
        }
        FieldValue::String(s.to_string())
    }
}
