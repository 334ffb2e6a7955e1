//! Cache storage.
//!
//! The gateway talks to its cache through the [`CacheStore`] trait, which
//! needs only two operations: `GET key` and `SETEX key ttl value`. Expiry
//! belongs to the store; the gateway never re-validates a hit.
//!
//! - [`MemoryStore`]: in-process moka cache with per-entry expiry. Good
//!   for a single instance and for tests.
//! - [`RedisStore`]: shared redis instance, so several gateway processes
//!   in front of the same node share one cache (feature `redis`).
//!
//! Keys are built by [`key::CacheKey`]. They include a time window, so
//! all requests for one logical query inside a window share one entry.

pub mod key;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use async_trait::async_trait;

use crate::Result;

pub use key::{CacheKey, CanonicalArgs};
pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

/// Key/value store with per-key expiry.
///
/// Implementations provide their own per-key atomicity. The gateway does
/// no locking across requests: two concurrent misses for the same key may
/// both write, and the last write wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up a value. `Ok(None)` on miss or expiry.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value that expires after `ttl_secs` seconds.
    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<()>;
}
