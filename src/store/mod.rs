//! # Storage
//!
//! - [`durable`] - key-value persistence contract and in-memory backend
//! - [`context_store`] - context checkpoints, field updates and diffs
//! - [`batch_store`] - batch run records

pub mod batch_store;
pub mod context_store;
pub mod durable;

pub use batch_store::BatchStore;
pub use context_store::{CheckpointId, ContextStore};
pub use durable::{DurableStore, InMemoryDurableStore, StorageError, StorageResult};
