//! Redis-backed cache store.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use super::CacheStore;
use crate::{GatewayError, Result};

/// Cache store on a shared redis instance.
///
/// Uses a [`ConnectionManager`], which reconnects on its own; a failed
/// command is still reported as `CacheStore` to the caller.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| GatewayError::Configuration(format!("invalid redis URL: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| GatewayError::CacheStore(format!("redis connect failed: {e}")))?;
        info!("connected to redis cache store");
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<Vec<u8>>>(key)
            .await
            .map_err(|e| GatewayError::CacheStore(format!("GET failed: {e}")))
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs)
            .await
            .map_err(|e| GatewayError::CacheStore(format!("SETEX failed: {e}")))?;
        debug!(%key, ttl_secs, "cache set");
        Ok(())
    }
}
