//! Tagged column values
//!
//! CDC payloads are heterogeneous: a column may arrive as a JSON scalar, a
//! nested document (jsonb), or a base64 string carrying a numeric encoding.
//! The decoder in the pipeline resolves all of that into this variant; from
//! here on the value has exactly one serialized form.

use std::collections::BTreeMap;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// A decoded column value.
///
/// `Decimal` holds the textual form of a numeric: a decimal string that
/// arrived as text (`"999.99"` stays `"999.99"`) or the decimal rendering
/// substituted for an encoded numeric. Numerics stay JSON strings in the
/// canonical form. `Timestamp` holds a normalized ISO-8601 string with
/// millisecond precision. `Integer` is reserved for values that arrived
/// as native JSON numbers and serializes as a bare number.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Bool(bool),
    Integer(i64),
    Decimal(String),
    Text(String),
    Timestamp(String),
    Array(Vec<ColumnValue>),
    Object(BTreeMap<String, ColumnValue>),
}

impl ColumnValue {
    /// The textual content, for string-like variants.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Decimal(s) | Self::Text(s) | Self::Timestamp(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl Serialize for ColumnValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Integer(n) => serializer.serialize_i64(*n),
            Self::Decimal(s) | Self::Text(s) | Self::Timestamp(s) => serializer.serialize_str(s),
            Self::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Object(map) => {
                // BTreeMap iteration is already key-sorted.
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
        }
    }
}

impl From<bool> for ColumnValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for ColumnValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<&str> for ColumnValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_serialization() {
        assert_eq!(serde_json::to_string(&ColumnValue::Null).unwrap(), "null");
        assert_eq!(
            serde_json::to_string(&ColumnValue::Bool(true)).unwrap(),
            "true"
        );
        assert_eq!(
            serde_json::to_string(&ColumnValue::Integer(42)).unwrap(),
            "42"
        );
    }

    #[test]
    fn test_numerics_stay_textual() {
        let value = ColumnValue::Decimal("999.99".to_string());
        assert_eq!(serde_json::to_string(&value).unwrap(), "\"999.99\"");

        // A numeric substituted for an encoded column is a string too.
        let value = ColumnValue::Decimal("999999000".to_string());
        assert_eq!(serde_json::to_string(&value).unwrap(), "\"999999000\"");
    }

    #[test]
    fn test_object_keys_sorted() {
        let mut map = BTreeMap::new();
        map.insert("zebra".to_string(), ColumnValue::Integer(1));
        map.insert("apple".to_string(), ColumnValue::Integer(2));
        let value = ColumnValue::Object(map);

        assert_eq!(
            serde_json::to_string(&value).unwrap(),
            r#"{"apple":2,"zebra":1}"#
        );
    }

    #[test]
    fn test_nested_array() {
        let value = ColumnValue::Array(vec![
            ColumnValue::Text("a".to_string()),
            ColumnValue::Null,
            ColumnValue::Integer(3),
        ]);
        assert_eq!(serde_json::to_string(&value).unwrap(), r#"["a",null,3]"#);
    }
}
