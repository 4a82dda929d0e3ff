//! Ports layer: capability traits for the three external services.
//!
//! The pipeline consumes a stream broker, an object store and a blockchain
//! anchor contract exclusively through these traits. Production adapters
//! live in `adapters/`; the in-memory implementations there back the
//! integration tests.

pub mod outbound;

pub use outbound::{
    AnchorClient, BatchSummary, MintReceipt, MintRequest, ObjectStore, OperationCounts,
    StreamBroker, StreamEntry, StreamEntryRef, TokenMetadata,
};
