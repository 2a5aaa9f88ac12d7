//! Shared keyed store seam.
//!
//! The coordination core assumes a reliable keyed store with expiring
//! entries and atomic get/set/delete — it never implements the store
//! itself. Production deployments hand in a backend (Redis, etcd, ...);
//! tests use the in-memory implementation.

mod memory;

use std::sync::Arc;

use async_trait::async_trait;

pub use memory::MemoryStore;

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to a keyed store.
pub type SharedKeyedStore = Arc<dyn KeyedStore>;

/// External keyed store with per-entry TTLs.
///
/// Keys are flat strings; the core namespaces them as
/// `signal:{receiverId}`, `ack:{coordinatorId}:{signalId}`,
/// `idempotency:{messageId}` and `retry:{signalId}:{attempt}`.
#[async_trait]
pub trait KeyedStore: Send + Sync {
    /// Fetch a value, `None` if absent or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Store a value. `ttl_secs == 0` means no expiry.
    async fn set(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> StoreResult<()>;

    /// Remove a value if present.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Whether a live entry exists for `key`.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// All live keys starting with `prefix`.
    async fn keys_matching(&self, prefix: &str) -> StoreResult<Vec<String>>;
}
