//! Websocket relay against a fake node websocket.

#![cfg(feature = "server")]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, connect_async, tungstenite};

use endpoint_cache::server::{AppState, rpc_router};
use endpoint_cache::{CacheGateway, FailoverTarget, PolicyStore, PolicyTable};

/// Fake node: greets, echoes text frames, and sends the literal `close`
/// when it receives `bye`. With `silent`, it accepts and never speaks.
async fn fake_node(silent: bool) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        if silent {
            while ws.next().await.is_some() {}
            return;
        }
        ws.send(Message::Text("hello".into())).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                if text == "bye" {
                    let _ = ws.send(Message::Text("close".into())).await;
                    break;
                }
                ws.send(Message::Text(format!("echo:{text}"))).await.unwrap();
            }
        }
    });
    addr
}

async fn spawn_gateway(relay: Option<(String, Option<Duration>)>) -> SocketAddr {
    let gateway = CacheGateway::builder()
        .policies(Arc::new(PolicyStore::fixed(PolicyTable::default())))
        .rpc(FailoverTarget::new("http://127.0.0.1:1"))
        .build()
        .unwrap();
    let mut state = AppState::new(Arc::new(gateway));
    if let Some((url, idle)) = relay {
        state = state.with_relay(url, idle);
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, rpc_router(state)).await.unwrap();
    });
    addr
}

/// Next text frame, skipping control frames. `None` once the session ends.
async fn next_text<S>(ws: &mut S) -> Option<String>
where
    S: futures_util::Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("relay stalled");
        match frame {
            Some(Ok(Message::Text(text))) => return Some(text.to_string()),
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
            Some(Ok(_)) => continue,
        }
    }
}

#[tokio::test]
async fn frames_are_relayed_both_ways_until_close_signal() {
    let node = fake_node(false).await;
    let gateway = spawn_gateway(Some((format!("ws://{node}/websocket"), None))).await;

    let (mut client, _) = connect_async(format!("ws://{gateway}/websocket"))
        .await
        .unwrap();

    assert_eq!(next_text(&mut client).await.as_deref(), Some("hello"));

    client
        .send(Message::Text(r#"{"method":"subscribe"}"#.into()))
        .await
        .unwrap();
    assert_eq!(
        next_text(&mut client).await.as_deref(),
        Some(r#"echo:{"method":"subscribe"}"#)
    );

    client.send(Message::Text("bye".into())).await.unwrap();
    // The literal `close` is not forwarded; the session just ends.
    assert_eq!(next_text(&mut client).await, None);
}

#[tokio::test]
async fn idle_session_is_closed() {
    let node = fake_node(true).await;
    let gateway = spawn_gateway(Some((
        format!("ws://{node}/websocket"),
        Some(Duration::from_millis(200)),
    )))
    .await;

    let (mut client, _) = connect_async(format!("ws://{gateway}/websocket"))
        .await
        .unwrap();
    assert_eq!(next_text(&mut client).await, None);
}

#[tokio::test]
async fn unreachable_node_closes_client() {
    let gateway = spawn_gateway(Some(("ws://127.0.0.1:1/websocket".to_string(), None))).await;

    let (mut client, _) = connect_async(format!("ws://{gateway}/websocket"))
        .await
        .unwrap();
    assert_eq!(next_text(&mut client).await, None);
}

#[tokio::test]
async fn relay_without_configured_upstream_is_not_found() {
    let gateway = spawn_gateway(None).await;

    let err = connect_async(format!("ws://{gateway}/websocket"))
        .await
        .unwrap_err();
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status(), 404),
        other => panic!("expected HTTP 404, got {other:?}"),
    }
}
