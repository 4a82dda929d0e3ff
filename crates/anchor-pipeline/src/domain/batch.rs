//! Sealed batches
//!
//! A `Batch` is the immutable unit of commitment: the normalized
//! transactions in arrival order, the Merkle tree over their leaf hashes,
//! and the lookup indices persisted next to the tree. Once built it is
//! never mutated; retries produce a new batch under a new id.
//!
//! Two hashes are computed per transaction. The raw-data hash covers only
//! the canonical payload image, and is what the read side uses to locate a
//! transaction by content. The leaf hash additionally covers the leaf
//! index, operation, timestamp and table, so the tree commits to position
//! and context rather than payload alone. The batch id is deliberately
//! excluded from the leaf hash: a batch re-minted after a failed commit
//! carries a fresh id but reproduces the same root, which is what
//! downstream deduplication keys on.

use std::collections::BTreeMap;

use anchor_types::{ChangeEvent, ColumnValue, OperationKind};
use chrono::{DateTime, NaiveDate};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::canonical::{canonical_bytes, hashed_payload};
use crate::domain::hashing::sha256_hex;
use crate::domain::merkle::MerkleTree;

/// Generate a fresh batch id for the given day: `BATCH-YYYY-MM-DD-<hex8>`.
pub fn generate_batch_id(day: NaiveDate) -> String {
    let nonce = Uuid::new_v4().simple().to_string();
    format!("BATCH-{}-{}", day.format("%Y-%m-%d"), &nonce[..8])
}

/// Suffix a shared base id when one trigger round seals several buffers.
/// The suffix is an opaque uniqueness token, nothing more.
pub fn shard_batch_id(base: &str, shard: usize) -> String {
    format!("{base}-T{shard}")
}

/// Per-operation row counts for one transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowsAffected {
    pub inserted: u32,
    pub updated: u32,
    pub deleted: u32,
}

impl RowsAffected {
    fn for_operation(operation: OperationKind) -> Self {
        match operation {
            OperationKind::Insert | OperationKind::Snapshot => Self {
                inserted: 1,
                ..Self::default()
            },
            OperationKind::Update => Self {
                updated: 1,
                ..Self::default()
            },
            OperationKind::Delete => Self {
                deleted: 1,
                ..Self::default()
            },
        }
    }
}

/// Normalized transaction metadata, as persisted in the batch body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionMetadata {
    pub transaction_id: String,
    pub timestamp: i64,
    pub operation_type: OperationKind,
    pub database_name: String,
    pub table_affected: String,
    pub rows_affected: RowsAffected,
    /// Leaf hash, repeated here so a verifier holding only the metadata
    /// can locate the transaction in the tree.
    pub hash: String,
    pub user_id: Option<String>,
    pub lsn: Option<i64>,
    pub transaction_db_id: Option<i64>,
}

/// The leaf pairing for one transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MerkleLeaf {
    pub index: usize,
    pub hash: String,
    pub raw_data_hash: String,
}

/// One transaction inside a sealed batch. The canonical payload is kept
/// for hashing and verification but is not persisted in artifacts.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchTransaction {
    pub metadata: TransactionMetadata,
    pub merkle_leaf: MerkleLeaf,
    pub payload: ColumnValue,
}

/// Lookup indices persisted alongside the tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchIndices {
    pub by_timestamp: BTreeMap<String, Vec<String>>,
    pub by_operation: BTreeMap<String, Vec<String>>,
    pub by_date: BTreeMap<String, Vec<String>>,
}

/// A sealed, immutable batch.
#[derive(Debug, Clone)]
pub struct Batch {
    pub batch_id: String,
    pub created_at_ms: i64,
    pub organization_id: String,
    pub database: String,
    /// All affected tables, sorted; usually exactly one.
    pub table_names: Vec<String>,
    pub transactions: Vec<BatchTransaction>,
    pub tree: MerkleTree,
    pub indices: BatchIndices,
}

impl Batch {
    /// Seal a batch over events in arrival order. Returns `None` for an
    /// empty event list.
    pub fn from_events(
        batch_id: String,
        organization_id: String,
        created_at_ms: i64,
        events: &[ChangeEvent],
    ) -> Option<Self> {
        let first = events.first()?;
        let database = first.database.clone();

        let mut table_names: Vec<String> = events.iter().map(|e| e.table.clone()).collect();
        table_names.sort();
        table_names.dedup();

        let mut transactions = Vec::with_capacity(events.len());
        let mut leaf_hashes = Vec::with_capacity(events.len());

        for (index, event) in events.iter().enumerate() {
            let payload = hashed_payload(event);
            let raw_data_hash = sha256_hex(&canonical_bytes(&payload));
            let leaf = leaf_hash(index, event, &payload);

            let metadata = TransactionMetadata {
                transaction_id: format!("{batch_id}-{index}"),
                timestamp: event.timestamp_ms,
                operation_type: event.operation,
                database_name: event.database.clone(),
                table_affected: event.table.clone(),
                rows_affected: RowsAffected::for_operation(event.operation),
                hash: leaf.clone(),
                user_id: event.source.user.clone(),
                lsn: event.source.lsn,
                transaction_db_id: event.source.tx_id,
            };

            leaf_hashes.push(leaf.clone());
            transactions.push(BatchTransaction {
                metadata,
                merkle_leaf: MerkleLeaf {
                    index,
                    hash: leaf,
                    raw_data_hash,
                },
                payload,
            });
        }

        let tree = MerkleTree::build(leaf_hashes)?;
        let indices = build_indices(&transactions);

        Some(Self {
            batch_id,
            created_at_ms,
            organization_id,
            database,
            table_names,
            transactions,
            tree,
            indices,
        })
    }

    /// Earliest source timestamp across the batch.
    pub fn earliest_timestamp(&self) -> i64 {
        self.transactions
            .iter()
            .map(|tx| tx.metadata.timestamp)
            .min()
            .unwrap_or(self.created_at_ms)
    }

    /// Counts of inserts, updates and deletes in the batch.
    pub fn operation_counts(&self) -> (u64, u64, u64) {
        let mut counts = (0, 0, 0);
        for tx in &self.transactions {
            match tx.metadata.operation_type {
                OperationKind::Insert | OperationKind::Snapshot => counts.0 += 1,
                OperationKind::Update => counts.1 += 1,
                OperationKind::Delete => counts.2 += 1,
            }
        }
        counts
    }

    /// The table prefix artifacts are stored under: the first affected
    /// table in sorted order.
    pub fn storage_table(&self) -> &str {
        self.table_names
            .first()
            .map(String::as_str)
            .unwrap_or("unknown")
    }
}

/// Leaf hash: canonical JSON of the transaction context plus payload.
fn leaf_hash(index: usize, event: &ChangeEvent, payload: &ColumnValue) -> String {
    let mut object = BTreeMap::new();
    object.insert("index".to_string(), ColumnValue::Integer(index as i64));
    object.insert(
        "operation".to_string(),
        ColumnValue::Text(event.operation.as_str().to_string()),
    );
    object.insert(
        "timestamp".to_string(),
        ColumnValue::Integer(event.timestamp_ms),
    );
    object.insert(
        "database".to_string(),
        ColumnValue::Text(event.database.clone()),
    );
    object.insert("table".to_string(), ColumnValue::Text(event.table.clone()));
    object.insert("payload".to_string(), payload.clone());

    sha256_hex(&canonical_bytes(&ColumnValue::Object(object)))
}

fn build_indices(transactions: &[BatchTransaction]) -> BatchIndices {
    let mut indices = BatchIndices::default();

    for tx in transactions {
        let id = tx.metadata.transaction_id.clone();
        let ts = tx.metadata.timestamp;

        indices
            .by_timestamp
            .entry(ts.to_string())
            .or_default()
            .push(id.clone());
        indices
            .by_operation
            .entry(tx.metadata.operation_type.as_str().to_string())
            .or_default()
            .push(id.clone());

        let date = DateTime::from_timestamp_millis(ts)
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "1970-01-01".to_string());
        indices.by_date.entry(date).or_default().push(id);
    }

    indices
}
