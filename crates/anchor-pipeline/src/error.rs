//! Error types for the anchoring pipeline
//!
//! Each external capability gets its own error enum; `PipelineError` is the
//! top-level disposition the orchestrator acts on. Retry and cleanup are
//! decided by the caller, never inside an adapter.

use thiserror::Error;

/// Errors from the stream broker capability.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("broker protocol error: {0}")]
    Protocol(String),

    #[error("broker command rejected: {0}")]
    CommandRejected(String),

    #[error("broker i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the object-store capability.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object upload failed for {key}: {reason}")]
    UploadFailed { key: String, reason: String },

    #[error("object delete failed for {key}: {reason}")]
    DeleteFailed { key: String, reason: String },

    #[error("bucket operation failed for {bucket}: {reason}")]
    BucketFailed { bucket: String, reason: String },
}

/// Errors from the blockchain anchor capability.
#[derive(Debug, Error)]
pub enum AnchorError {
    /// The contract already holds this token id. Callers treat this as a
    /// successful (replayed) mint.
    #[error("token already minted: {token_id}")]
    AlreadyMinted { token_id: String },

    #[error("mint call failed: {0}")]
    CallFailed(String),

    #[error("mint call timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

impl AnchorError {
    pub fn is_already_minted(&self) -> bool {
        matches!(self, Self::AlreadyMinted { .. })
    }
}

/// Errors surfaced by the pipeline orchestrator.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The entry's envelope could not be parsed into a change event. The
    /// single event is dropped and its entry acknowledged; the batch is
    /// never stalled by one bad record.
    #[error("malformed event on {stream} ({entry_id}): {reason}")]
    MalformedEvent {
        stream: String,
        entry_id: String,
        reason: String,
    },

    /// The broker is unreachable; the consumer backs off and retries
    /// indefinitely without acknowledging anything.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(#[from] BrokerError),

    /// An artifact upload failed after best-effort cleanup of the partial
    /// object set. The batch is retried under a fresh id.
    #[error("object store upload failed: {0}")]
    ObjectStoreUploadFailed(#[from] StoreError),

    /// Minting failed after all retry attempts. Artifacts stay in place;
    /// entries are not acknowledged.
    #[error("mint failed for {token_id}: {reason}")]
    MintFailed { token_id: String, reason: String },

    /// Invalid or missing configuration, fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),
}
