//! In-memory keyed store with TTL expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::{KeyedStore, SharedKeyedStore, StoreResult};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

/// In-process [`KeyedStore`] implementation.
///
/// Expiry is lazy: entries are dropped when read past their TTL. Suitable
/// for tests and single-process deployments; cross-process coordination
/// needs a real shared backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared trait-object reference.
    pub fn shared(self) -> SharedKeyedStore {
        Arc::new(self)
    }

    /// Number of live entries (test/diagnostic helper).
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    /// Whether the store holds no live entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KeyedStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                None => return Ok(None),
                Some(_) => {} // expired — fall through to evict
            }
        }
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> StoreResult<()> {
        let expires_at = if ttl_secs == 0 {
            None
        } else {
            Some(Instant::now() + Duration::from_secs(ttl_secs))
        };
        self.entries
            .write()
            .await
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn keys_matching(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
