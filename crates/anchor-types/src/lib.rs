//! # Anchor Types Crate
//!
//! Shared domain vocabulary for the CDC anchoring agent.
//!
//! This crate contains the types that cross crate boundaries: the decoded
//! change event consumed from the stream broker, the operation kinds of the
//! upstream capture, and the tagged column value produced by payload
//! decoding. Everything downstream of the consumer (batching, hashing,
//! artifact composition) speaks these types.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: cross-crate types live here and nowhere else.
//! - **Decoded at the Edge**: `ChangeEvent` carries already-decoded column
//!   values; the rest of the pipeline never sees wire encodings.
//! - **Deterministic Serialization**: `ColumnValue` serializes to exactly one
//!   JSON shape, independent of how the value arrived.

pub mod event;
pub mod value;

pub use event::{ChangeEvent, OperationKind, SourceMeta};
pub use value::ColumnValue;

/// A payload image: column name to decoded value, ordered by column name.
pub type RowImage = std::collections::BTreeMap<String, value::ColumnValue>;
