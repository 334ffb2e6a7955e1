//! Cache-aside gateway.
//!
//! [`CacheGateway`] runs each query through the same pipeline:
//!
//! ```text
//!   (protocol, path/method, args)
//!        │
//!        ▼
//!   PolicyStore::resolve ── Disabled ──► GatewayError::EndpointDisabled
//!        │ Seconds(ttl)                  (no cache access, no upstream call)
//!        ▼
//!   CacheKey::build(prefix, path, args, ttl, now)
//!        │
//!        ▼
//!   CacheStore::get ── hit ──► count total_cache, return cached body
//!        │ miss
//!        ▼
//!   UpstreamClient::call (primary, then backup on transport failure)
//!        │
//!        ├── non-2xx ──► return status + body untouched, nothing cached
//!        ▼
//!   CacheStore::set_ex(key, body, ttl), count total_outbound, return body
//! ```
//!
//! RPC batch submissions (a JSON array body) skip all of this and go to
//! the primary once.

mod builder;

use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tracing::{debug, instrument};

use crate::cache::{CacheKey, CacheStore, CanonicalArgs};
use crate::counter::{CallCounter, CallKind, counter_name};
use crate::policy::{PolicyStore, Protocol, Ttl};
use crate::telemetry;
use crate::upstream::{Target, UpstreamClient, UpstreamRequest, UpstreamResponse};
use crate::{GatewayError, Result};

pub use builder::GatewayBuilder;

/// Source of wall-clock time for cache windows.
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch.
    fn unix_secs(&self) -> u64;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Upstream(Target),
}

/// Body and status returned to the caller.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub source: ResponseSource,
}

impl GatewayResponse {
    fn cached(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            body,
            source: ResponseSource::Cache,
        }
    }

    fn from_upstream(response: UpstreamResponse) -> Self {
        Self {
            status: response.status,
            body: response.body,
            source: ResponseSource::Upstream(response.target),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_cache_hit(&self) -> bool {
        self.source == ResponseSource::Cache
    }

    /// Parse the body as JSON.
    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Key prefixes separating protocols (and deployments sharing one store).
#[derive(Debug, Clone)]
pub struct KeyPrefixes {
    pub rpc: String,
    pub rest: String,
}

impl Default for KeyPrefixes {
    fn default() -> Self {
        Self {
            rpc: "rpc".to_string(),
            rest: "rest".to_string(),
        }
    }
}

/// One cacheable query after protocol-specific parsing.
struct Lookup<'a> {
    protocol: Protocol,
    endpoint: &'static str,
    path_or_method: &'a str,
    args: CanonicalArgs,
    request: UpstreamRequest<'a>,
}

/// Composition root: policies, cache store, upstream clients, counter.
pub struct CacheGateway {
    policies: Arc<PolicyStore>,
    store: Arc<dyn CacheStore>,
    rpc: UpstreamClient,
    rest: Option<UpstreamClient>,
    counter: Arc<CallCounter>,
    clock: Arc<dyn Clock>,
    prefixes: KeyPrefixes,
}

impl CacheGateway {
    /// Create a new builder.
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    pub fn policies(&self) -> &Arc<PolicyStore> {
        &self.policies
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn counter(&self) -> &Arc<CallCounter> {
        &self.counter
    }

    pub fn rpc_upstream(&self) -> &UpstreamClient {
        &self.rpc
    }

    pub fn rest_upstream(&self) -> Option<&UpstreamClient> {
        self.rest.as_ref()
    }

    pub fn prefix(&self, protocol: Protocol) -> &str {
        match protocol {
            Protocol::Rpc => &self.prefixes.rpc,
            Protocol::Rest => &self.prefixes.rest,
        }
    }

    /// `GET /<path>` on the RPC facade.
    pub async fn rpc_get(&self, path: &str, args: &[(String, String)]) -> Result<GatewayResponse> {
        let path = path.trim_start_matches('/');
        self.lookup(Lookup {
            protocol: Protocol::Rpc,
            endpoint: "rpc_get",
            path_or_method: path,
            args: CanonicalArgs::from_query(args),
            request: UpstreamRequest::Get { path, query: args },
        })
        .await
    }

    /// `GET /<path>` on the REST facade.
    pub async fn rest_get(&self, path: &str, args: &[(String, String)]) -> Result<GatewayResponse> {
        let path = path.trim_start_matches('/');
        self.lookup(Lookup {
            protocol: Protocol::Rest,
            endpoint: "rest_get",
            path_or_method: path,
            args: CanonicalArgs::from_query(args),
            request: UpstreamRequest::Get { path, query: args },
        })
        .await
    }

    /// `POST /` on the RPC facade with a JSON-RPC body.
    ///
    /// A single call `{"method": ..., "params": ...}` is cached by method and
    /// canonical params. A batch (JSON array) is forwarded to the primary
    /// as-is, uncached and without failover.
    pub async fn rpc_post(&self, body: &[u8]) -> Result<GatewayResponse> {
        let request: Value = serde_json::from_slice(body)
            .map_err(|e| GatewayError::InvalidInput(format!("request body is not JSON: {e}")))?;

        match &request {
            Value::Array(calls) => {
                debug!(calls = calls.len(), "forwarding RPC batch to primary");
                let response = self
                    .rpc
                    .call_primary(UpstreamRequest::Post { path: "", body })
                    .await?;
                Ok(GatewayResponse::from_upstream(response))
            }
            Value::Object(call) => {
                let method = call.get("method").and_then(Value::as_str).ok_or_else(|| {
                    GatewayError::InvalidInput("JSON-RPC request has no string 'method'".into())
                })?;
                let params = call.get("params").unwrap_or(&Value::Null);
                self.lookup(Lookup {
                    protocol: Protocol::Rpc,
                    endpoint: "rpc_post",
                    path_or_method: method,
                    args: CanonicalArgs::from_json(params),
                    request: UpstreamRequest::Post { path: "", body },
                })
                .await
            }
            _ => Err(GatewayError::InvalidInput(
                "JSON-RPC request must be an object or an array".into(),
            )),
        }
    }

    #[instrument(skip_all, fields(protocol = %q.protocol, path = q.path_or_method))]
    async fn lookup(&self, q: Lookup<'_>) -> Result<GatewayResponse> {
        let ttl_secs = match self.policies.resolve(q.path_or_method, q.protocol) {
            Ttl::Seconds(secs) => secs,
            Ttl::Disabled => {
                metrics::counter!(telemetry::DISABLED_TOTAL, "protocol" => q.protocol.as_str())
                    .increment(1);
                return Err(GatewayError::EndpointDisabled {
                    protocol: q.protocol,
                    path: q.path_or_method.to_string(),
                });
            }
        };
        let window = NonZeroU64::new(ttl_secs).ok_or_else(|| {
            GatewayError::Configuration(format!("zero cache lifetime for '{}'", q.path_or_method))
        })?;

        let key = CacheKey::build(
            self.prefix(q.protocol),
            q.path_or_method,
            &q.args,
            window,
            self.clock.unix_secs(),
        );

        if let Some(body) = self.store.get(key.as_str()).await? {
            metrics::counter!(telemetry::CACHE_HITS_TOTAL, "protocol" => q.protocol.as_str())
                .increment(1);
            self.counter
                .increment(&counter_name(CallKind::CacheHit, q.endpoint))
                .await;
            debug!(%key, "cache hit");
            return Ok(GatewayResponse::cached(body));
        }
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "protocol" => q.protocol.as_str())
            .increment(1);

        let upstream = self.upstream(q.protocol)?;
        let response = upstream.call(q.request).await?;

        if !response.is_success() {
            debug!(status = response.status, "upstream error status, not caching");
            return Ok(GatewayResponse::from_upstream(response));
        }

        self.store
            .set_ex(key.as_str(), &response.body, ttl_secs)
            .await?;
        self.counter
            .increment(&counter_name(CallKind::Outbound, q.endpoint))
            .await;
        debug!(%key, ttl_secs, "cached upstream response");

        Ok(GatewayResponse::from_upstream(response))
    }

    fn upstream(&self, protocol: Protocol) -> Result<&UpstreamClient> {
        match protocol {
            Protocol::Rpc => Ok(&self.rpc),
            Protocol::Rest => self.rest.as_ref().ok_or_else(|| {
                GatewayError::Configuration("no REST upstream configured".to_string())
            }),
        }
    }
}
