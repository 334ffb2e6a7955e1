//! Persistent call counters with throttled flushing.
//!
//! [`CallCounter`] keeps per-name counts in memory and writes the whole
//! table to its [`KvStore`] once every `flush_every` increments, counted
//! across all names. An unclean shutdown loses at most `flush_every - 1`
//! increments. The threshold is checked under one mutex, so it is crossed
//! exactly once, and the table is copied there before the lock is released.
//! The copy is written on the blocking pool. Each copy carries a generation
//! and a write never replaces a newer one on disk.

pub mod store;

use std::collections::BTreeMap;

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{GatewayError, Result};

pub use store::KvStore;

/// Default number of increments between flushes.
pub const DEFAULT_FLUSH_EVERY: u64 = 250;

/// What a counted call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Answered from the cache store.
    CacheHit,
    /// Went to the upstream node and populated the cache.
    Outbound,
}

impl CallKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CacheHit => "total_cache",
            Self::Outbound => "total_outbound",
        }
    }
}

/// Counter name for a call kind on an endpoint family, e.g.
/// `total_cache;rpc_get`.
pub fn counter_name(kind: CallKind, endpoint: &str) -> String {
    format!("{};{endpoint}", kind.as_str())
}

/// Counter behaviour.
#[derive(Debug, Clone)]
pub struct CounterConfig {
    /// When false, increments are ignored and nothing is written.
    pub enabled: bool,
    /// Increments between flushes. Values below 1 are treated as 1.
    pub flush_every: u64,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            flush_every: DEFAULT_FLUSH_EVERY,
        }
    }
}

#[derive(Debug, Default)]
struct CounterState {
    counts: BTreeMap<String, u64>,
    since_flush: u64,
    generation: u64,
}

impl CounterState {
    fn take_snapshot(&mut self) -> (u64, BTreeMap<String, u64>) {
        self.since_flush = 0;
        self.generation += 1;
        (self.generation, self.counts.clone())
    }
}

/// Throttled, persistent hit/outbound counter.
pub struct CallCounter {
    state: Mutex<CounterState>,
    store: Option<KvStore>,
    /// Generation of the last table written to the store.
    written: Arc<Mutex<u64>>,
    flush_every: u64,
}

impl CallCounter {
    /// Create a counter backed by `store`, starting from its last dump.
    pub fn new(store: KvStore, config: &CounterConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        let counts = store.load();
        debug!(store = store.name(), entries = counts.len(), "loaded counters");
        Self {
            state: Mutex::new(CounterState {
                counts,
                since_flush: 0,
                generation: 0,
            }),
            store: Some(store),
            written: Arc::new(Mutex::new(0)),
            flush_every: config.flush_every.max(1),
        }
    }

    /// A counter that ignores every increment.
    pub fn disabled() -> Self {
        Self {
            state: Mutex::new(CounterState::default()),
            store: None,
            written: Arc::new(Mutex::new(0)),
            flush_every: DEFAULT_FLUSH_EVERY,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Add one to `name`, flushing the table if this is the Nth increment
    /// since the last flush. Returns once that flush has been written.
    pub async fn increment(&self, name: &str) {
        let Some(store) = &self.store else {
            return;
        };

        let snapshot = {
            let mut state = self.state.lock();
            *state.counts.entry(name.to_string()).or_insert(0) += 1;
            state.since_flush += 1;
            (state.since_flush >= self.flush_every).then(|| state.take_snapshot())
        };

        let Some((generation, counts)) = snapshot else {
            return;
        };
        if let Err(e) = self.write(store, generation, counts).await {
            warn!(store = store.name(), error = %e, "failed to flush counters");
        }
    }

    /// Current in-memory value of `name`.
    pub fn get(&self, name: &str) -> u64 {
        self.state.lock().counts.get(name).copied().unwrap_or(0)
    }

    /// Copy of all in-memory counts.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.state.lock().counts.clone()
    }

    /// Write the table now, regardless of the threshold.
    pub async fn flush(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let (generation, counts) = self.state.lock().take_snapshot();
        self.write(store, generation, counts).await
    }

    async fn write(
        &self,
        store: &KvStore,
        generation: u64,
        counts: BTreeMap<String, u64>,
    ) -> Result<()> {
        let store = store.clone();
        let written = Arc::clone(&self.written);
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut last = written.lock();
            if generation <= *last {
                return Ok(());
            }
            store.dump(&counts)?;
            *last = generation;
            Ok(())
        })
        .await
        .map_err(|e| GatewayError::Configuration(format!("counter flush task failed: {e}")))?
    }
}
