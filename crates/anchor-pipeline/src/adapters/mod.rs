//! Adapters layer: concrete implementations of the outbound ports.

pub mod anchor_chain;
pub mod memory;
pub mod object_store;
pub mod redis;
pub mod resp;

pub use anchor_chain::{AnchorChainConfig, ChainCredential, ChainNetwork, HttpAnchorClient};
pub use memory::{InMemoryAnchorClient, InMemoryObjectStore, InMemoryStreamBroker};
pub use object_store::{HttpObjectStore, ObjectStoreConfig};
pub use redis::{RedisConfig, RedisStreamBroker};
