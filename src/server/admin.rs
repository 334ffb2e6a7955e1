//! Administrative endpoints: `/cache_info`, `/stats`, `/reload`.

use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::{AppState, error_response};
use crate::GatewayError;
use crate::policy::Protocol;
use crate::version::{BuildInfo, build_info};

/// Lifetime of the cached `/cache_info` payload.
pub const CACHE_INFO_TTL_SECS: u64 = 15 * 60;

#[derive(Debug, Deserialize)]
pub struct PasswordQuery {
    pub password: Option<String>,
}

/// Body of `/stats`.
#[derive(Debug, Serialize)]
pub struct StatsReport {
    pub version: BuildInfo,
    pub counters: BTreeMap<String, u64>,
}

/// Current policy document.
///
/// Served from the cache store for 15 minutes. On a miss the policy is
/// reloaded from its source first, so edits to the document show up here
/// (and take effect) within that interval.
pub async fn cache_info(State(state): State<AppState>) -> Result<Response, GatewayError> {
    let gateway = &state.gateway;
    let key = format!("{};cache_times", gateway.prefix(Protocol::Rpc));

    if let Some(body) = gateway.store().get(&key).await? {
        return Ok(json_bytes(body));
    }

    if let Err(e) = gateway.policies().reload().await {
        warn!(error = %e, "serving current policy after failed reload");
    }
    let body = serde_json::to_vec(&gateway.policies().document())?;
    gateway
        .store()
        .set_ex(&key, &body, CACHE_INFO_TTL_SECS)
        .await?;
    Ok(json_bytes(body))
}

/// Build info and call counters.
pub async fn stats(State(state): State<AppState>, Query(query): Query<PasswordQuery>) -> Response {
    if !state.password_matches(query.password.as_deref()) {
        return error_response(StatusCode::UNAUTHORIZED, "invalid password");
    }
    Json(StatsReport {
        version: build_info(),
        counters: state.gateway.counter().snapshot(),
    })
    .into_response()
}

/// Reload the policy document now.
pub async fn reload(State(state): State<AppState>, Query(query): Query<PasswordQuery>) -> Response {
    if !state.password_matches(query.password.as_deref()) {
        return error_response(StatusCode::UNAUTHORIZED, "invalid password");
    }
    match state.gateway.policies().reload().await {
        Ok(table) => {
            info!("policy reloaded via admin endpoint");
            Json(serde_json::json!({
                "reloaded": true,
                "rpc_rules": table.policies(Protocol::Rpc).len(),
                "rest_rules": table.policies(Protocol::Rest).len(),
            }))
            .into_response()
        }
        Err(e) => e.into_response(),
    }
}

fn json_bytes(body: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}
