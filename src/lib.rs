//! Endpoint cache - time-windowed response cache for blockchain node APIs
//!
//! This crate fronts a node's JSON RPC and REST interfaces with a shared
//! cache. Each endpoint gets a cache lifetime from a reloadable policy
//! document; identical queries inside one lifetime window share one cache
//! entry and therefore one upstream call. A transport failure against the
//! primary node is retried once against a backup node.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use endpoint_cache::{CacheGateway, FailoverTarget, PolicyDocument, PolicyStore, PolicyTable};
//!
//! #[tokio::main]
//! async fn main() -> endpoint_cache::Result<()> {
//!     let document = PolicyDocument::parse(r#"{"DEFAULT": 6, "rpc": {"abci_info": 30}}"#)?;
//!     let policies = Arc::new(PolicyStore::fixed(PolicyTable::compile(document)?));
//!
//!     let gateway = CacheGateway::builder()
//!         .policies(policies)
//!         .rpc(FailoverTarget::new("http://127.0.0.1:26657").with_backup("http://10.0.0.2:26657"))
//!         .build()?;
//!
//!     let response = gateway.rpc_get("abci_info", &[]).await?;
//!     println!("{}", String::from_utf8_lossy(&response.body));
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod counter;
pub mod error;
pub mod gateway;
pub mod policy;
#[cfg(feature = "server")]
pub mod server;
pub mod telemetry;
pub mod upstream;
pub mod version;

// Re-export main types at crate root
pub use cache::{CacheKey, CacheStore, CanonicalArgs, MemoryStore};
pub use counter::{CallCounter, CallKind, CounterConfig, KvStore};
pub use error::{GatewayError, Result};
pub use gateway::{CacheGateway, Clock, GatewayBuilder, GatewayResponse, ResponseSource, SystemClock};
pub use policy::{
    EndpointPattern, EndpointPolicy, PolicyDocument, PolicySource, PolicyStore, PolicyTable,
    Protocol, Ttl,
};
pub use upstream::{FailoverTarget, Target, UpstreamClient, UpstreamRequest, UpstreamResponse};
pub use version::{PKG_VERSION, build_info, version_string};

#[cfg(feature = "redis")]
pub use cache::RedisStore;
