//! Persistence collaborator.
//!
//! The relay core writes audit records and snapshots here without waiting
//! for them to land. Nothing the relay decides depends on a write
//! succeeding.

pub mod memory;

use futures_util::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;

pub use memory::MemoryStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store serialization failed: {0}")]
    Serialization(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Append-only records plus a small key/value space.
pub trait Store: Send + Sync {
    fn append(&self, record: Value) -> BoxFuture<'_, StoreResult<()>>;

    fn save<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, StoreResult<()>>;

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StoreResult<Option<Value>>>;
}
