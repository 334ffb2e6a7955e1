//! Websocket relay to the node's `/websocket` endpoint.
//!
//! Each client session gets exactly one upstream connection to the
//! primary. Frames are forwarded verbatim in both directions. The session
//! ends when either side closes, when the upstream sends the literal text
//! frame `close`, or after the optional idle timeout; both sockets are then
//! closed. There is no failover and no buffering.

use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite};
use tracing::{debug, info, warn};

use super::{AppState, error_response};

/// Text frame that ends a session when sent by the upstream.
pub const CLOSE_SIGNAL: &str = "close";

// Stand-in deadline when no idle timeout is configured; the branch is
// disabled in that case.
const NO_DEADLINE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Upstream websocket endpoint and session limits.
#[derive(Debug, Clone)]
pub struct RelayTarget {
    pub url: String,
    pub idle_timeout: Option<Duration>,
}

/// Why a relay session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    ClientClosed,
    UpstreamClosed,
    CloseSignal,
    IdleTimeout,
}

/// `GET /websocket`.
pub async fn websocket(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    let Some(target) = state.relay.clone() else {
        return error_response(
            StatusCode::NOT_FOUND,
            "no upstream websocket is configured on this node",
        );
    };

    upgrade.on_upgrade(move |client| async move {
        match relay(client, &target).await {
            Ok(end) => debug!(?end, "relay session finished"),
            Err(e) => warn!(url = %target.url, error = %e, "relay session failed"),
        }
    })
}

/// Pump frames between `client` and a fresh upstream connection until the
/// session ends.
pub async fn relay(
    client: WebSocket,
    target: &RelayTarget,
) -> Result<RelayEnd, tungstenite::Error> {
    let (upstream, _) = connect_async(target.url.as_str()).await?;
    info!(url = %target.url, "relay session opened");

    let (mut upstream_sink, mut upstream_stream) = upstream.split();
    let (mut client_sink, mut client_stream) = client.split();

    let idle = tokio::time::sleep(target.idle_timeout.unwrap_or(NO_DEADLINE));
    tokio::pin!(idle);

    let end = loop {
        tokio::select! {
            // Upstream → client
            frame = upstream_stream.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        debug!(error = %e, "upstream websocket error");
                        break RelayEnd::UpstreamClosed;
                    }
                    None => break RelayEnd::UpstreamClosed,
                };
                if matches!(&frame, tungstenite::Message::Text(text) if text.as_str() == CLOSE_SIGNAL) {
                    break RelayEnd::CloseSignal;
                }
                let Some(message) = upstream_to_client(frame) else {
                    break RelayEnd::UpstreamClosed;
                };
                if client_sink.send(message).await.is_err() {
                    break RelayEnd::ClientClosed;
                }
            }

            // Client → upstream
            message = client_stream.next() => {
                let message = match message {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        debug!(error = %e, "client websocket error");
                        break RelayEnd::ClientClosed;
                    }
                    None => break RelayEnd::ClientClosed,
                };
                let Some(frame) = client_to_upstream(message) else {
                    break RelayEnd::ClientClosed;
                };
                if upstream_sink.send(frame).await.is_err() {
                    break RelayEnd::UpstreamClosed;
                }
            }

            () = &mut idle, if target.idle_timeout.is_some() => {
                break RelayEnd::IdleTimeout;
            }
        }

        if let Some(timeout) = target.idle_timeout {
            idle.as_mut().reset(Instant::now() + timeout);
        }
    };

    let _ = client_sink.close().await;
    let _ = upstream_sink.close().await;
    info!(?end, "relay session closed");
    Ok(end)
}

/// `None` for a close frame.
fn client_to_upstream(message: Message) -> Option<tungstenite::Message> {
    match message {
        Message::Text(text) => Some(tungstenite::Message::Text(text.to_string())),
        Message::Binary(data) => Some(tungstenite::Message::Binary(data.to_vec())),
        Message::Ping(data) => Some(tungstenite::Message::Ping(data.to_vec())),
        Message::Pong(data) => Some(tungstenite::Message::Pong(data.to_vec())),
        Message::Close(_) => None,
    }
}

/// `None` for a close frame or a raw frame.
fn upstream_to_client(frame: tungstenite::Message) -> Option<Message> {
    match frame {
        tungstenite::Message::Text(text) => Some(Message::Text(text.into())),
        tungstenite::Message::Binary(data) => Some(Message::Binary(data.into())),
        tungstenite::Message::Ping(data) => Some(Message::Ping(data.into())),
        tungstenite::Message::Pong(data) => Some(Message::Pong(data.into())),
        tungstenite::Message::Close(_) | tungstenite::Message::Frame(_) => None,
    }
}
