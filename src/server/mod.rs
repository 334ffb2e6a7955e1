//! HTTP facades served by `ecached`.
//!
//! This module provides:
//! - The RPC router (`rpc_router`): cached `GET /{path}` and `POST /`, the
//!   upstream index page, admin endpoints and the websocket relay
//! - The REST router (`rest_router`): cached `GET /{path}` and admin stats
//! - Configuration types (`config`)
//!
//! Gateway results are turned into HTTP responses here. Every error body
//! is `{"error": "<message>"}`.

pub mod admin;
pub mod config;
pub mod relay;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use serde_json::json;
use tokio::sync::OnceCell;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::cache::{CacheStore, MemoryStore};
use crate::counter::CallCounter;
use crate::gateway::{CacheGateway, GatewayResponse};
use crate::policy::PolicyStore;
use crate::upstream::UpstreamRequest;
use crate::{GatewayError, Result};

use self::config::{CacheBackend, Config};

/// Shared state of both listeners.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<CacheGateway>,
    stats_password: Arc<str>,
    relay: Option<Arc<relay::RelayTarget>>,
    index_page: Arc<OnceCell<String>>,
}

impl AppState {
    pub fn new(gateway: Arc<CacheGateway>) -> Self {
        Self {
            gateway,
            stats_password: Arc::from(""),
            relay: None,
            index_page: Arc::new(OnceCell::new()),
        }
    }

    /// Require `?password=` on `/stats` and `/reload`. Empty disables the check.
    pub fn with_stats_password(mut self, password: impl Into<String>) -> Self {
        self.stats_password = Arc::from(password.into());
        self
    }

    /// Relay `/websocket` sessions to `url`.
    pub fn with_relay(mut self, url: impl Into<String>, idle_timeout: Option<Duration>) -> Self {
        self.relay = Some(Arc::new(relay::RelayTarget {
            url: url.into(),
            idle_timeout,
        }));
        self
    }

    pub(crate) fn password_matches(&self, given: Option<&str>) -> bool {
        self.stats_password.is_empty() || given == Some(&*self.stats_password)
    }
}

/// Build the shared state from configuration: load the policy, connect the
/// cache store, open the counter and assemble the gateway.
pub async fn build_state(config: &Config) -> Result<AppState> {
    let policies = Arc::new(PolicyStore::load(config.policy_source()).await?);

    let store: Arc<dyn CacheStore> = match config.cache.backend {
        CacheBackend::Memory => Arc::new(match config.cache.max_entries {
            Some(max) => MemoryStore::with_max_entries(max),
            None => MemoryStore::new(),
        }),
        #[cfg(feature = "redis")]
        CacheBackend::Redis => {
            Arc::new(crate::cache::RedisStore::connect(&config.cache.redis_url).await?)
        }
        #[cfg(not(feature = "redis"))]
        CacheBackend::Redis => {
            return Err(GatewayError::Configuration(
                "redis backend requested but built without the `redis` feature".to_string(),
            ));
        }
    };

    let counter = Arc::new(CallCounter::new(
        config.counter_store(),
        &config.counter_config(),
    ));

    let mut builder = CacheGateway::builder()
        .policies(policies)
        .store(store)
        .counter(counter)
        .rpc(config.rpc_target()?)
        .timeout(config.timeout())
        .prefixes(&config.cache.rpc_prefix, &config.cache.rest_prefix);
    if let Some(rest) = config.rest_target()? {
        builder = builder.rest(rest);
    }

    let mut state = AppState::new(Arc::new(builder.build()?))
        .with_stats_password(config.admin.stats_password.clone());
    if let Some(url) = config.websocket_url()? {
        let idle = config.relay.idle_timeout_secs.map(Duration::from_secs);
        state = state.with_relay(url, idle);
    }
    Ok(state)
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Router for the RPC listener.
pub fn rpc_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(rpc_index).post(rpc_post))
        .route("/cache_info", get(admin::cache_info))
        .route("/stats", get(admin::stats))
        .route("/reload", axum::routing::post(admin::reload))
        .route("/websocket", get(relay::websocket))
        .route("/{*path}", get(rpc_get))
        .layer(cors())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Router for the REST listener.
pub fn rest_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(rest_index))
        .route("/stats", get(admin::stats))
        .route("/{*path}", get(rest_get).post(rest_post))
        .layer(cors())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn rpc_get(
    State(state): State<AppState>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
) -> std::result::Result<GatewayResponse, GatewayError> {
    let args = parse_query(query.as_deref());
    state.gateway.rpc_get(&path, &args).await
}

async fn rpc_post(
    State(state): State<AppState>,
    body: Bytes,
) -> std::result::Result<GatewayResponse, GatewayError> {
    state.gateway.rpc_post(&body).await
}

async fn rest_get(
    State(state): State<AppState>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
) -> std::result::Result<GatewayResponse, GatewayError> {
    let args = parse_query(query.as_deref());
    state.gateway.rest_get(&path, &args).await
}

async fn rest_post(Path(path): Path<String>) -> Response {
    error_response(
        StatusCode::NOT_IMPLEMENTED,
        format!("the REST path '{path}' does not yet have POST support on this node"),
    )
}

async fn rest_index() -> Json<serde_json::Value> {
    Json(json!({
        "service": "endpoint-cache",
        "version": crate::version_string(),
        "description": "Caching REST gateway. GET any upstream REST path on this host.",
        "endpoints": {
            "/{path}": "cached upstream GET",
            "/stats": "call counters",
        },
    }))
}

/// Upstream RPC index page with links pointing at this host.
async fn rpc_index(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> std::result::Result<Response, GatewayError> {
    let page = state
        .index_page
        .get_or_try_init(|| async {
            let response = state
                .gateway
                .rpc_upstream()
                .call(UpstreamRequest::Get {
                    path: "",
                    query: &[],
                })
                .await?;
            if !response.is_success() {
                return Err(GatewayError::Http(format!(
                    "upstream index returned status {}",
                    response.status
                )));
            }
            Ok::<_, GatewayError>(String::from_utf8_lossy(&response.body).into_owned())
        })
        .await?;

    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");

    Ok((
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        rewrite_index_host(page, host),
    )
        .into_response())
}

/// Replace the node address in the index page links with `host`.
///
/// The node renders its own address into every link
/// (`<a href="//node:26657/abci_info?">`). The address is taken from the
/// first link and all occurrences are replaced.
pub fn rewrite_index_host(page: &str, host: &str) -> String {
    const LINK: &str = "<a href=\"//";
    let Some(start) = page.find(LINK).map(|i| i + LINK.len()) else {
        return page.to_string();
    };
    let Some(len) = page[start..].find('/') else {
        return page.to_string();
    };
    let upstream = &page[start..start + len];
    if upstream.is_empty() {
        return page.to_string();
    }
    page.replace(&format!("//{upstream}/"), &format!("//{host}/"))
}

/// Decode a raw query string into ordered pairs.
pub fn parse_query(raw: Option<&str>) -> Vec<(String, String)> {
    raw.map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

impl GatewayError {
    /// HTTP status for this error at the listener boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::EndpointDisabled { .. } => StatusCode::FORBIDDEN,
            Self::UpstreamTransport { .. } | Self::Http(_) => StatusCode::BAD_GATEWAY,
            Self::CacheStore(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidInput(_) | Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self, "request failed");
        } else {
            debug!(status = status.as_u16(), error = %self, "request rejected");
        }
        error_response(status, self.to_string())
    }
}

impl IntoResponse for GatewayResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::BAD_GATEWAY);
        (
            status,
            [(header::CONTENT_TYPE, "application/json")],
            self.body,
        )
            .into_response()
    }
}
