//! Service layer: orchestration over the domain and the outbound ports.

pub mod minter;
pub mod pipeline;
pub mod publisher;

pub use minter::AnchorMinter;
pub use pipeline::{Pipeline, PipelineConfig};
pub use publisher::ArtifactPublisher;
