//! CDC envelope parsing
//!
//! Each broker entry carries the capture envelope under its `value` field:
//! a JSON object with the single-letter operation code, the source block
//! (database, table, log position), and the optional before/after images.
//! Parsing never fails on unknown columns; it fails only when the envelope
//! itself is unusable, and such entries are dropped and acknowledged
//! without stalling the batch.

use std::collections::HashMap;

use anchor_types::{ChangeEvent, OperationKind, SourceMeta};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use crate::domain::canonical::decode_image;
use crate::error::PipelineError;

/// Entry field holding the envelope document.
const VALUE_FIELD: &str = "value";

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    op: Option<String>,
    ts_ms: Option<i64>,
    before: Option<Value>,
    after: Option<Value>,
    source: Option<RawSource>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSource {
    db: Option<String>,
    schema: Option<String>,
    table: Option<String>,
    ts_ms: Option<i64>,
    lsn: Option<i64>,
    #[serde(rename = "txId")]
    tx_id: Option<i64>,
    user: Option<String>,
}

/// Parse one broker entry into a change event.
pub fn parse_entry(
    stream: &str,
    entry_id: &str,
    fields: &HashMap<String, String>,
) -> Result<ChangeEvent, PipelineError> {
    let malformed = |reason: String| PipelineError::MalformedEvent {
        stream: stream.to_string(),
        entry_id: entry_id.to_string(),
        reason,
    };

    let raw = fields
        .get(VALUE_FIELD)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| malformed("missing value field".to_string()))?;

    let envelope: RawEnvelope =
        serde_json::from_str(raw).map_err(|e| malformed(format!("invalid envelope: {e}")))?;

    let op_code = envelope
        .op
        .ok_or_else(|| malformed("missing op code".to_string()))?;
    let operation = OperationKind::from_wire_code(&op_code)
        .map_err(|e| malformed(e.to_string()))?;

    let source = envelope.source.unwrap_or_default();
    let timestamp_ms = envelope
        .ts_ms
        .or(source.ts_ms)
        .unwrap_or_else(|| Utc::now().timestamp_millis());

    let database = source.db.unwrap_or_else(|| "unknown".to_string());
    let table = source
        .table
        .or_else(|| stream.rsplit('.').next().map(str::to_string))
        .ok_or_else(|| malformed("missing table name".to_string()))?;

    let before = match &envelope.before {
        Some(Value::Object(map)) => Some(decode_image(map)),
        _ => None,
    };
    let after = match &envelope.after {
        Some(Value::Object(map)) => Some(decode_image(map)),
        _ => None,
    };

    // A delete with no before-image has nothing to commit to.
    if operation == OperationKind::Delete && before.is_none() {
        return Err(malformed("delete event without before image".to_string()));
    }

    Ok(ChangeEvent {
        stream: stream.to_string(),
        entry_id: entry_id.to_string(),
        operation,
        timestamp_ms,
        database: database.clone(),
        table: table.clone(),
        before,
        after,
        source: SourceMeta {
            database,
            schema: source.schema,
            table,
            lsn: source.lsn,
            tx_id: source.tx_id,
            user: source.user,
        },
    })
}
