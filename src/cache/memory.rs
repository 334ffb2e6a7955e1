//! In-process cache store.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;

use super::CacheStore;
use crate::Result;

/// Default maximum number of entries in the memory store.
pub const DEFAULT_MAX_ENTRIES: u64 = 50_000;

#[derive(Clone)]
struct Entry {
    body: Vec<u8>,
    ttl: Duration,
}

/// Expires each entry after the lifetime it was written with.
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Bounded moka cache honouring the per-key lifetime given to `set_ex`.
pub struct MemoryStore {
    cache: Cache<String, Entry>,
}

impl MemoryStore {
    /// Create a store with the default capacity.
    pub fn new() -> Self {
        Self::with_max_entries(DEFAULT_MAX_ENTRIES)
    }

    /// Create a store holding at most `max` entries.
    pub fn with_max_entries(max: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max)
            .expire_after(PerEntryTtl)
            .build();
        Self { cache }
    }

    /// Number of live entries (approximate until pending tasks run).
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.cache.get(key).await.map(|e| e.body))
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<()> {
        let entry = Entry {
            body: value.to_vec(),
            ttl: Duration::from_secs(ttl_secs),
        };
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }
}
