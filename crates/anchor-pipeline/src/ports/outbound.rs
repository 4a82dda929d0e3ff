//! Outbound ports (driven side)
//!
//! Minimal capability surface per external service: read-stream and ack
//! for the broker, upload and delete for the object store, mint for the
//! anchor contract. Keeping the surface this small is what lets the
//! integration tests run the whole pipeline against in-memory fakes.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{AnchorError, BrokerError, StoreError};

/// One raw entry read from a broker stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub stream: String,
    /// Opaque ordered entry id assigned by the broker.
    pub id: String,
    pub fields: HashMap<String, String>,
}

/// Reference to a consumed entry, held until acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamEntryRef {
    pub stream: String,
    pub entry_id: String,
}

/// Consumer-group access to the stream broker.
#[async_trait]
pub trait StreamBroker: Send + Sync {
    /// Names of streams matching a glob pattern, sorted.
    async fn discover_streams(&self, pattern: &str) -> Result<Vec<String>, BrokerError>;

    /// Create the consumer group on a stream if absent, starting from the
    /// earliest unread entry. Idempotent.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BrokerError>;

    /// Blocking multi-stream read of up to `count` new entries for the
    /// group, waiting at most `block`. An empty vec means the timeout
    /// elapsed with nothing to read.
    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        streams: &[String],
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, BrokerError>;

    /// Acknowledge entries against the group.
    async fn ack(
        &self,
        stream: &str,
        group: &str,
        entry_ids: &[String],
    ) -> Result<(), BrokerError>;
}

/// Object storage under the organization's bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create the bucket if it does not exist yet.
    async fn ensure_bucket(&self) -> Result<(), StoreError>;

    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError>;

    async fn delete_object(&self, key: &str) -> Result<(), StoreError>;

    fn bucket(&self) -> &str;

    /// Externally resolvable URL for a stored object, used as the token's
    /// reference link.
    fn reference_url(&self, key: &str) -> String;
}

/// Operation tally carried in the on-chain batch summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OperationCounts {
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
}

/// The summary anchored with the token, mirroring the contract's
/// `mint_batch` argument structure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub database_name: String,
    pub table_names: Vec<String>,
    /// Earliest source timestamp in the batch, milliseconds.
    pub timestamp: i64,
    pub tx_count: u64,
    pub merkle_root: String,
    pub object_store_bucket: String,
    pub object_store_key_prefix: String,
    pub size_bytes: u64,
    pub operation_counts: OperationCounts,
}

/// Descriptive token metadata minted alongside the summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenMetadata {
    pub title: String,
    pub description: String,
    pub copies: u32,
    /// Mint wall-clock time, milliseconds, as a string.
    pub issued_at: String,
    /// URL of the batch body document.
    pub reference: String,
}

/// A complete mint call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MintRequest {
    /// Token id; equal to the batch id, which makes replays idempotent.
    pub token_id: String,
    pub receiver: String,
    pub token_metadata: TokenMetadata,
    pub batch_summary: BatchSummary,
}

/// Receipt for a successful (or replayed) mint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MintReceipt {
    pub token_id: String,
    pub tx_hash: String,
    pub block_height: String,
    pub gas_used: String,
    /// True when the contract reported the token as already minted.
    pub replayed: bool,
}

/// The blockchain anchor contract.
#[async_trait]
pub trait AnchorClient: Send + Sync {
    /// Account that owns minted tokens.
    fn owner(&self) -> &str;

    /// Single mint attempt. Replays surface as
    /// [`AnchorError::AlreadyMinted`]; retry policy lives with the caller.
    async fn mint_batch(&self, request: &MintRequest) -> Result<MintReceipt, AnchorError>;
}
