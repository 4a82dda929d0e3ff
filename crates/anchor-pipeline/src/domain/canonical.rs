//! Payload canonicalization
//!
//! Turns the heterogeneous column values of a CDC payload into one
//! deterministic byte form. Two normalizations happen here:
//!
//! 1. **Encoded numerics.** Upstream capture ships numeric columns as
//!    base64-encoded big-endian two's-complement bytes. Candidate strings
//!    are decoded and substituted by the decimal string form of the
//!    integer; the canonical form keeps numerics as strings, so `"D0JA"`
//!    becomes `"1000000"` and `"999.99"` stays `"999.99"`. Strings that
//!    are already plain decimal text are exempt from the attempt, which
//!    keeps canonicalization idempotent.
//! 2. **Timestamps.** Columns named `*_at` arrive either as epoch integers
//!    (milliseconds or microseconds) or as timestamp strings in assorted
//!    shapes. Both normalize to `YYYY-MM-DDTHH:MM:SS.mmm` with exactly
//!    millisecond precision; an explicit timezone suffix is preserved.
//!
//! The canonical byte form is compact JSON with keys in lexicographic
//! order. Permuting the input column order never changes the output.

use anchor_types::{ChangeEvent, ColumnValue, OperationKind, RowImage};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::DateTime;
use serde_json::Value;

/// Epoch values above this are treated as sub-second-precision timestamps.
const EPOCH_MILLIS_FLOOR: i64 = 1_000_000_000_000;
/// Epoch values above this are microseconds rather than milliseconds.
const EPOCH_MICROS_FLOOR: i64 = 1_000_000_000_000_000;
/// Decoded integers at or beyond this magnitude are not plausible column
/// values and the original string is retained.
const NUMERIC_MAGNITUDE_CEILING: i64 = 1_000_000_000_000;

/// Decode a raw JSON payload image into canonical column values.
///
/// Decoding recurses through nested documents and arrays; the timestamp
/// rule applies to top-level columns only.
pub fn decode_image(image: &serde_json::Map<String, Value>) -> RowImage {
    image
        .iter()
        .map(|(column, value)| {
            let decoded = decode_json_value(value);
            let decoded = if column.ends_with("_at") {
                normalize_time_column(decoded)
            } else {
                decoded
            };
            (column.clone(), decoded)
        })
        .collect()
}

/// Canonical bytes of one value: compact JSON, keys sorted, UTF-8, no
/// trailing newline. This is the hasher's input.
pub fn canonical_bytes(value: &ColumnValue) -> Vec<u8> {
    // ColumnValue serialization is deterministic by construction; the only
    // map type involved is a BTreeMap.
    serde_json::to_vec(value).unwrap_or_default()
}

/// The payload image a transaction's content hash is computed over:
/// the after-image for INSERT/UPDATE/SNAPSHOT, the before-image for
/// DELETE, and a composite of both when the preferred image is missing.
pub fn hashed_payload(event: &ChangeEvent) -> ColumnValue {
    match event.operation {
        OperationKind::Insert | OperationKind::Update | OperationKind::Snapshot => {
            if let Some(after) = &event.after {
                return ColumnValue::Object(after.clone());
            }
        }
        OperationKind::Delete => {
            if let Some(before) = &event.before {
                return ColumnValue::Object(before.clone());
            }
        }
    }

    let image_or_null = |image: &Option<RowImage>| match image {
        Some(map) => ColumnValue::Object(map.clone()),
        None => ColumnValue::Null,
    };

    let mut composite = std::collections::BTreeMap::new();
    composite.insert(
        "operation".to_string(),
        ColumnValue::Text(event.operation.as_str().to_string()),
    );
    composite.insert("before".to_string(), image_or_null(&event.before));
    composite.insert("after".to_string(), image_or_null(&event.after));
    ColumnValue::Object(composite)
}

fn decode_json_value(value: &Value) -> ColumnValue {
    match value {
        Value::Null => ColumnValue::Null,
        Value::Bool(b) => ColumnValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => ColumnValue::Integer(i),
            None => ColumnValue::Decimal(n.to_string()),
        },
        Value::String(s) => decode_text(s),
        Value::Array(items) => ColumnValue::Array(items.iter().map(decode_json_value).collect()),
        Value::Object(map) => ColumnValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), decode_json_value(v)))
                .collect(),
        ),
    }
}

fn decode_text(s: &str) -> ColumnValue {
    if is_plain_number(s) {
        // Already in canonical decimal form; decoding again must not
        // change it.
        return ColumnValue::Decimal(s.to_string());
    }

    if is_base64_candidate(s) {
        if let Some(n) = decode_base64_integer(s) {
            // The decimal string form, not a JSON number: numerics stay
            // strings in the canonical form.
            return ColumnValue::Decimal(n.to_string());
        }
    }

    ColumnValue::Text(s.to_string())
}

fn is_plain_number(s: &str) -> bool {
    let digits = s.strip_prefix(['-', '+']).unwrap_or(s);
    !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.chars().filter(|&c| c == '.').count() <= 1
        && digits.chars().any(|c| c.is_ascii_digit())
}

fn is_base64_candidate(s: &str) -> bool {
    if s.is_empty() || s.len() % 4 != 0 {
        return false;
    }
    let body = s.trim_end_matches('=');
    if s.len() - body.len() > 2 {
        return false;
    }
    body.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/')
}

/// Interpret 1..=8 decoded bytes as a signed big-endian integer, if the
/// result sits in a plausible column-value range.
fn decode_base64_integer(s: &str) -> Option<i64> {
    let bytes = STANDARD.decode(s).ok()?;
    if bytes.is_empty() || bytes.len() > 8 {
        return None;
    }

    let fill = if bytes[0] & 0x80 != 0 { 0xFF } else { 0x00 };
    let mut buf = [fill; 8];
    buf[8 - bytes.len()..].copy_from_slice(&bytes);
    let value = i64::from_be_bytes(buf);

    if value == 0 || value <= -NUMERIC_MAGNITUDE_CEILING || value >= NUMERIC_MAGNITUDE_CEILING {
        return None;
    }
    Some(value)
}

fn normalize_time_column(value: ColumnValue) -> ColumnValue {
    match value {
        ColumnValue::Integer(n) if n > EPOCH_MILLIS_FLOOR => match epoch_to_iso(n) {
            Some(ts) => ColumnValue::Timestamp(ts),
            None => ColumnValue::Integer(n),
        },
        ColumnValue::Text(s) => match normalize_timestamp_string(&s) {
            Some(ts) => ColumnValue::Timestamp(ts),
            None => ColumnValue::Text(s),
        },
        other => other,
    }
}

/// Render an epoch timestamp (milliseconds, or microseconds for 16+ digit
/// values) as an ISO-8601 string with millisecond precision, UTC.
pub fn epoch_to_iso(value: i64) -> Option<String> {
    let millis = if value > EPOCH_MICROS_FLOOR {
        value / 1000
    } else {
        value
    };
    DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string())
}

/// Reshape a timestamp string to `YYYY-MM-DDTHH:MM:SS.mmm`: 'T' separator,
/// fractional seconds truncated or zero-padded to three digits, timezone
/// suffix kept only when the source carried one. Returns `None` for
/// strings that do not look like timestamps.
fn normalize_timestamp_string(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    if bytes.len() < 19 || !s.is_ascii() {
        return None;
    }

    let date = &s[..10];
    let date_ok = date
        .chars()
        .enumerate()
        .all(|(i, c)| if i == 4 || i == 7 { c == '-' } else { c.is_ascii_digit() });
    if !date_ok || (bytes[10] != b'T' && bytes[10] != b' ') {
        return None;
    }

    let time = &s[11..19];
    let time_ok = time
        .chars()
        .enumerate()
        .all(|(i, c)| if i == 2 || i == 5 { c == ':' } else { c.is_ascii_digit() });
    if !time_ok {
        return None;
    }

    let rest = &s[19..];
    let (frac, tz) = match rest.strip_prefix('.') {
        Some(tail) => {
            let end = tail
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(tail.len());
            if end == 0 {
                return None;
            }
            (&tail[..end], &tail[end..])
        }
        None => ("", rest),
    };

    if !tz.is_empty() && tz != "Z" && !tz.starts_with('+') && !tz.starts_with('-') {
        return None;
    }

    let mut millis: String = frac.chars().take(3).collect();
    while millis.len() < 3 {
        millis.push('0');
    }

    Some(format!("{date}T{time}.{millis}{tz}"))
}
