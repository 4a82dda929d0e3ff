//! Change events and operation kinds
//!
//! One `ChangeEvent` is one row-level change consumed from a broker stream,
//! with its payload images already decoded. The broker entry id rides along
//! so the consumer can acknowledge exactly the entries that fed a committed
//! batch.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::RowImage;

/// The operation kind of a captured row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
    Snapshot,
}

/// Error for an unrecognized operation code on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown operation code: {0:?}")]
pub struct UnknownOperation(pub String);

impl OperationKind {
    /// Map the single-letter wire code (`c`/`u`/`d`/`r`) to a kind.
    pub fn from_wire_code(code: &str) -> Result<Self, UnknownOperation> {
        match code {
            "c" => Ok(Self::Insert),
            "u" => Ok(Self::Update),
            "d" => Ok(Self::Delete),
            "r" => Ok(Self::Snapshot),
            other => Err(UnknownOperation(other.to_string())),
        }
    }

    /// Canonical upper-case name, as written into artifacts.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Snapshot => "SNAPSHOT",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source metadata carried by the capture envelope.
///
/// Everything here is optional except the database and table names; the
/// pipeline treats unknown fields as opaque and never fails on them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMeta {
    /// Database name (`source.db`).
    pub database: String,
    /// Schema name, when the connector reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Table name (`source.table`).
    pub table: String,
    /// Log sequence number at capture time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lsn: Option<i64>,
    /// Upstream database transaction id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<i64>,
    /// Database user that issued the change, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// One decoded CDC record.
///
/// Lives from the broker read until the batch containing it is acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Stream the entry was read from.
    pub stream: String,
    /// Opaque ordered broker entry id, used for acknowledgement.
    pub entry_id: String,
    pub operation: OperationKind,
    /// Source timestamp, milliseconds since epoch.
    pub timestamp_ms: i64,
    pub database: String,
    pub table: String,
    /// Row image before the change (DELETE, and usually UPDATE).
    pub before: Option<RowImage>,
    /// Row image after the change (INSERT, UPDATE, SNAPSHOT).
    pub after: Option<RowImage>,
    pub source: SourceMeta,
}

impl ChangeEvent {
    /// The buffer key this event accumulates under.
    pub fn table_key(&self) -> (String, String) {
        (self.database.clone(), self.table.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_code_mapping() {
        assert_eq!(
            OperationKind::from_wire_code("c").unwrap(),
            OperationKind::Insert
        );
        assert_eq!(
            OperationKind::from_wire_code("u").unwrap(),
            OperationKind::Update
        );
        assert_eq!(
            OperationKind::from_wire_code("d").unwrap(),
            OperationKind::Delete
        );
        assert_eq!(
            OperationKind::from_wire_code("r").unwrap(),
            OperationKind::Snapshot
        );
        assert!(OperationKind::from_wire_code("x").is_err());
    }

    #[test]
    fn test_operation_serializes_upper_case() {
        assert_eq!(
            serde_json::to_string(&OperationKind::Insert).unwrap(),
            "\"INSERT\""
        );
        assert_eq!(OperationKind::Snapshot.as_str(), "SNAPSHOT");
    }
}
