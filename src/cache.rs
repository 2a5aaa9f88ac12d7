//! Capacity- and age-bounded cache.
//!
//! Insertion-ordered: when the cache is full the oldest entry is evicted.
//! Entries also expire after an optional TTL, checked lazily on access.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

/// A bounded map used for suppression registries (feedback dedup,
/// idempotency-style bookkeeping held in-process).
#[derive(Debug)]
pub struct BoundedCache<K, V> {
    entries: HashMap<K, (V, Instant)>,
    order: VecDeque<K>,
    capacity: usize,
    ttl: Option<Duration>,
}

impl<K: Eq + Hash + Clone, V> BoundedCache<K, V> {
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            ttl: None,
        }
    }

    /// Expire entries older than `ttl`.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Insert an entry, evicting the oldest if at capacity.
    ///
    /// Re-inserting an existing key refreshes its value and age.
    pub fn insert(&mut self, key: K, value: V) {
        self.evict_expired();

        if self.entries.contains_key(&key) {
            self.order.retain(|k| k != &key);
        } else if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }

        self.order.push_back(key.clone());
        self.entries.insert(key, (value, Instant::now()));
    }

    /// Look up a live entry.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.evict_expired();
        self.entries.get(key).map(|(v, _)| v)
    }

    /// Whether a live entry exists for `key`.
    pub fn contains(&mut self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Number of live entries.
    pub fn len(&mut self) -> usize {
        self.evict_expired();
        self.entries.len()
    }

    /// Whether the cache holds no live entries.
    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn evict_expired(&mut self) {
        let Some(ttl) = self.ttl else { return };
        let now = Instant::now();
        while let Some(front) = self.order.front() {
            let expired = self
                .entries
                .get(front)
                .map(|(_, at)| now.duration_since(*at) >= ttl)
                .unwrap_or(true);
            if !expired {
                break;
            }
            let key = self.order.pop_front().unwrap();
            self.entries.remove(&key);
        }
    }
}
