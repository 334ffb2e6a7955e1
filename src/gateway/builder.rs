//! Builder for configuring gateway instances

use std::sync::Arc;
use std::time::Duration;

use super::{CacheGateway, Clock, KeyPrefixes, SystemClock};
use crate::cache::{CacheStore, MemoryStore};
use crate::counter::CallCounter;
use crate::policy::{PolicyStore, Protocol};
use crate::upstream::{DEFAULT_TIMEOUT, FailoverTarget, UpstreamClient};
use crate::{GatewayError, Result};

/// Builder for [`CacheGateway`].
///
/// Policies and an RPC target are required. Everything else has a
/// default: an in-memory store, a disabled counter, the system clock and
/// a 5 second upstream timeout.
pub struct GatewayBuilder {
    policies: Option<Arc<PolicyStore>>,
    store: Option<Arc<dyn CacheStore>>,
    rpc_target: Option<FailoverTarget>,
    rest_target: Option<FailoverTarget>,
    counter: Option<Arc<CallCounter>>,
    clock: Arc<dyn Clock>,
    prefixes: KeyPrefixes,
    timeout: Duration,
    http_client: Option<reqwest::Client>,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self {
            policies: None,
            store: None,
            rpc_target: None,
            rest_target: None,
            counter: None,
            clock: Arc::new(SystemClock),
            prefixes: KeyPrefixes::default(),
            timeout: DEFAULT_TIMEOUT,
            http_client: None,
        }
    }

    /// Set the policy store.
    pub fn policies(mut self, policies: Arc<PolicyStore>) -> Self {
        self.policies = Some(policies);
        self
    }

    /// Set the cache store.
    pub fn store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the RPC primary/backup pair.
    pub fn rpc(mut self, target: FailoverTarget) -> Self {
        self.rpc_target = Some(target);
        self
    }

    /// Set the REST primary/backup pair.
    pub fn rest(mut self, target: FailoverTarget) -> Self {
        self.rest_target = Some(target);
        self
    }

    /// Set the call counter.
    pub fn counter(mut self, counter: Arc<CallCounter>) -> Self {
        self.counter = Some(counter);
        self
    }

    /// Replace the clock used for cache windows.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the cache key prefixes.
    pub fn prefixes(mut self, rpc: impl Into<String>, rest: impl Into<String>) -> Self {
        self.prefixes = KeyPrefixes {
            rpc: rpc.into(),
            rest: rest.into(),
        };
        self
    }

    /// Set the per-attempt upstream timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Share an existing HTTP client. Its own timeout applies instead of
    /// [`timeout()`](Self::timeout).
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Build the gateway.
    pub fn build(self) -> Result<CacheGateway> {
        let policies = self
            .policies
            .ok_or_else(|| GatewayError::Configuration("no policy store configured".into()))?;
        let rpc_target = self
            .rpc_target
            .ok_or_else(|| GatewayError::Configuration("no RPC upstream configured".into()))?;

        if self.prefixes.rpc.contains(';') || self.prefixes.rest.contains(';') {
            return Err(GatewayError::Configuration(
                "cache key prefixes must not contain ';'".into(),
            ));
        }

        let http = match self.http_client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .timeout(self.timeout)
                .build()
                .map_err(|e| {
                    GatewayError::Configuration(format!("failed to build HTTP client: {e}"))
                })?,
        };

        let rpc = UpstreamClient::with_http_client(Protocol::Rpc, rpc_target, http.clone());
        let rest = self
            .rest_target
            .map(|target| UpstreamClient::with_http_client(Protocol::Rest, target, http));

        Ok(CacheGateway {
            policies,
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemoryStore::new())),
            rpc,
            rest,
            counter: self
                .counter
                .unwrap_or_else(|| Arc::new(CallCounter::disabled())),
            clock: self.clock,
            prefixes: self.prefixes,
        })
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}
