//! Domain layer: pure batching and commitment logic, no I/O.

pub mod accumulator;
pub mod batch;
pub mod canonical;
pub mod config;
pub mod envelope;
pub mod hashing;
pub mod merkle;

pub use accumulator::{BatchAccumulator, SealReason, SealedEvents};
pub use batch::{generate_batch_id, shard_batch_id, Batch, BatchTransaction, MerkleLeaf};
pub use config::BatchingConfig;
pub use merkle::{MerkleProof, MerkleTree, SiblingPosition};
