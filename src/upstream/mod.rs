//! Upstream node client with one-level failover.
//!
//! Every request goes to the primary first. Only a transport failure
//! (connect error, DNS failure, timeout, dropped body) sends the identical
//! request once to the backup. A primary that answers with an error status
//! is reachable and is taken at its word: its response comes back as-is.
//!
//! ```text
//!   call(request)
//!        │
//!        ▼
//!   ┌─────────┐  answered (any status)
//!   │ primary │ ─────────────────────────► UpstreamResponse
//!   └────┬────┘
//!        │ transport error
//!        ▼
//!   ┌─────────┐  answered (any status)
//!   │ backup  │ ─────────────────────────► UpstreamResponse
//!   └────┬────┘
//!        │ transport error
//!        ▼
//!   GatewayError::UpstreamTransport
//! ```
//!
//! There is no backoff, no further retry and no circuit breaker.

use std::time::{Duration, Instant};

use reqwest::Client;
use tracing::{debug, warn};

use crate::policy::Protocol;
use crate::telemetry;
use crate::{GatewayError, Result};

/// Default upstream request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Primary and optional backup base URLs, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverTarget {
    pub primary: String,
    pub backup: Option<String>,
}

impl FailoverTarget {
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            backup: None,
        }
    }

    pub fn with_backup(mut self, backup: impl Into<String>) -> Self {
        self.backup = Some(backup.into());
        self
    }
}

/// Which target produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Primary,
    Backup,
}

impl Target {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Backup => "backup",
        }
    }
}

/// Request description, replayed verbatim against the backup.
#[derive(Debug, Clone, Copy)]
pub enum UpstreamRequest<'a> {
    Get {
        path: &'a str,
        query: &'a [(String, String)],
    },
    Post {
        path: &'a str,
        body: &'a [u8],
    },
}

/// An answer from a reachable upstream, successful or not.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub target: Target,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client for one protocol facade of the node.
#[derive(Clone)]
pub struct UpstreamClient {
    http: Client,
    target: FailoverTarget,
    protocol: Protocol,
}

impl UpstreamClient {
    /// Create a client with its own connection pool and `timeout`.
    pub fn new(protocol: Protocol, target: FailoverTarget, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_http_client(protocol, target, http))
    }

    /// Create a client sharing an existing connection pool.
    pub fn with_http_client(protocol: Protocol, target: FailoverTarget, http: Client) -> Self {
        Self {
            http,
            target,
            protocol,
        }
    }

    pub fn target(&self) -> &FailoverTarget {
        &self.target
    }

    /// Send to the primary, failing over once to the backup on a transport
    /// error.
    pub async fn call(&self, request: UpstreamRequest<'_>) -> Result<UpstreamResponse> {
        let primary_err = match self.send(Target::Primary, &self.target.primary, request).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        let Some(backup) = &self.target.backup else {
            warn!(protocol = %self.protocol, error = %primary_err, "primary unreachable, no backup configured");
            return Err(GatewayError::UpstreamTransport {
                primary: primary_err.to_string(),
                backup: "not configured".to_string(),
            });
        };

        warn!(
            protocol = %self.protocol,
            error = %primary_err,
            "primary unreachable, failing over to backup"
        );
        metrics::counter!(telemetry::FAILOVERS_TOTAL, "protocol" => self.protocol.as_str())
            .increment(1);

        self.send(Target::Backup, backup, request)
            .await
            .map_err(|backup_err| GatewayError::UpstreamTransport {
                primary: primary_err.to_string(),
                backup: backup_err.to_string(),
            })
    }

    /// Send to the primary only.
    pub async fn call_primary(&self, request: UpstreamRequest<'_>) -> Result<UpstreamResponse> {
        self.send(Target::Primary, &self.target.primary, request)
            .await
            .map_err(|e| GatewayError::UpstreamTransport {
                primary: e.to_string(),
                backup: "not attempted".to_string(),
            })
    }

    /// One attempt against one base URL. `Err` means transport failure.
    async fn send(
        &self,
        target: Target,
        base: &str,
        request: UpstreamRequest<'_>,
    ) -> Result<UpstreamResponse> {
        let started = Instant::now();
        let builder = match request {
            UpstreamRequest::Get { path, query } => {
                self.http.get(join_url(base, path)).query(query)
            }
            UpstreamRequest::Post { path, body } => self
                .http
                .post(join_url(base, path))
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.to_vec()),
        };

        let result = async {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, body.to_vec()))
        }
        .await;

        metrics::histogram!(telemetry::UPSTREAM_DURATION_SECONDS,
            "protocol" => self.protocol.as_str(),
            "target" => target.as_str(),
        )
        .record(started.elapsed().as_secs_f64());

        match result {
            Ok((status, body)) => {
                metrics::counter!(telemetry::UPSTREAM_REQUESTS_TOTAL,
                    "protocol" => self.protocol.as_str(),
                    "target" => target.as_str(),
                    "status" => "ok",
                )
                .increment(1);
                debug!(protocol = %self.protocol, target = target.as_str(), status, "upstream answered");
                Ok(UpstreamResponse {
                    status,
                    body,
                    target,
                })
            }
            Err(e) => {
                metrics::counter!(telemetry::UPSTREAM_REQUESTS_TOTAL,
                    "protocol" => self.protocol.as_str(),
                    "target" => target.as_str(),
                    "status" => "error",
                )
                .increment(1);
                Err(GatewayError::Http(describe_transport_error(&e)))
            }
        }
    }
}

/// Join a base URL and a relative path. An empty path leaves `base` as-is.
fn join_url(base: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return base.to_string();
    }
    format!("{}/{path}", base.trim_end_matches('/'))
}

fn describe_transport_error(error: &reqwest::Error) -> String {
    let kind = if error.is_timeout() {
        "timed out"
    } else if error.is_connect() {
        "connection failed"
    } else if error.is_body() || error.is_decode() {
        "response body error"
    } else {
        "request failed"
    };
    match error.url() {
        Some(url) => format!("{kind}: {}", url.as_str()),
        None => kind.to_string(),
    }
}
