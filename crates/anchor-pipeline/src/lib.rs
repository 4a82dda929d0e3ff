//! # Anchor Pipeline
//!
//! Change-data-capture batching and blockchain anchoring.
//!
//! The pipeline consumes row-level change events from named broker
//! streams, accumulates them into per-table batches under size, idle and
//! age triggers, computes a Merkle commitment over each batch, publishes
//! the batch artifacts to an object store, and anchors the Merkle root by
//! minting a token whose metadata carries the root, the batch descriptor
//! and a pointer to the stored payload.
//!
//! ## Architecture
//!
//! This crate follows Hexagonal Architecture (Ports & Adapters):
//!
//! - **Domain Layer** (`domain/`): pure logic, no I/O
//!   - payload canonicalization and hashing
//!   - Merkle tree construction with per-leaf proofs
//!   - per-table batch accumulation and sealing triggers
//! - **Ports Layer** (`ports/`): capability traits for the broker, the
//!   object store and the anchor contract
//! - **Service Layer** (`service/`): orchestration
//!   - `Pipeline` owns the read → seal → upload → mint → ack loop
//!   - `ArtifactPublisher` enforces commit-marker upload ordering
//!   - `AnchorMinter` applies the mint retry policy
//! - **Adapters Layer** (`adapters/`): external connections plus fully
//!   functional in-memory implementations used by the tests
//!
//! ## Commit protocol
//!
//! Supporting artifacts upload first, the batch body last; broker entries
//! are acknowledged only after the token is minted (or confirmed already
//! minted). A token observable on-chain therefore always references a
//! complete, readable artifact set whose root matches the token.

pub mod adapters;
pub mod artifacts;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod ports;
pub mod service;

pub use artifacts::{compose, ArtifactDocument, ArtifactSet};
pub use domain::{
    Batch, BatchAccumulator, BatchingConfig, MerkleProof, MerkleTree, SealReason, SealedEvents,
    SiblingPosition,
};
pub use error::{AnchorError, BrokerError, PipelineError, StoreError};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use ports::{AnchorClient, MintReceipt, MintRequest, ObjectStore, StreamBroker};
pub use service::{Pipeline, PipelineConfig};
