//! Scenario: Push Channel
//!
//! # Invariants under test
//!
//! 1. The handshake carries the bearer token.
//! 2. Frames reach the engine: `order:new` inserts, `order:status` advances.
//! 3. A frame with an unknown event name is dropped without disturbing the
//!    stream.
//! 4. A 401 at the handshake stops the reader and raises
//!    `AuthenticationLost`; no reconnect follows.
//! 5. A dropped connection is re-established.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{order_json, wait_for_state, FakeApi, T0};
use futures_util::SinkExt;
use rod_reconcile::{EngineConfig, OrderStatus};
use rod_session::{Notice, PushSettings, Session, SessionClock, SessionSettings};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;

fn push_only(url: String) -> SessionSettings {
    SessionSettings {
        engine: EngineConfig::default(),
        notifications_limit: 50,
        poll: None,
        push: Some(PushSettings {
            url,
            token: Some("push-token".to_string()),
            reconnect_base: Duration::from_millis(50),
            reconnect_max: Duration::from_millis(200),
        }),
    }
}

fn frame(event: &str, data: serde_json::Value) -> Message {
    Message::Text(json!({"event": event, "data": data}).to_string())
}

#[tokio::test]
async fn frames_flow_into_state() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/socket", listener.local_addr().unwrap());

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut auth = None;
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
            auth = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            Ok(resp)
        })
        .await
        .unwrap();
        ws.send(frame("order:new", order_json("o1", "new", T0)))
            .await
            .unwrap();
        ws.send(frame("menu:updated", json!({"id": "m1"}))).await.unwrap();
        ws.send(frame(
            "order-status-updated",
            json!({"orderId": "o1", "status": "preparing", "updatedAt": T0 + 5_000, "seq": 2}),
        ))
        .await
        .unwrap();
        // Hold the socket open until the client is done.
        tokio::time::sleep(Duration::from_secs(5)).await;
        auth
    });

    let api = FakeApi::new();
    let session = Session::start_with_clock(
        Arc::new(api),
        push_only(url),
        SessionClock::starting_at(T0 + 1_000),
    );
    let mut rx = session.subscribe();
    let state = wait_for_state(&mut rx, |s| {
        s.order("o1").map(|o| o.status) == Some(OrderStatus::Preparing)
    })
    .await;
    assert_eq!(state.orders.len(), 1);

    session.shutdown().await;
    let auth = server.await.unwrap();
    assert_eq!(auth.as_deref(), Some("Bearer push-token"));
}

#[tokio::test]
async fn handshake_401_stops_push() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/socket", listener.local_addr().unwrap());
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&attempts);

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            seen.fetch_add(1, Ordering::SeqCst);
            let mut buf = [0u8; 2048];
            let _ = stream.read(&mut buf).await;
            let _ = stream
                .write_all(b"HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\n\r\n")
                .await;
        }
    });

    let session = Session::start_with_clock(
        Arc::new(FakeApi::new()),
        push_only(url),
        SessionClock::starting_at(T0),
    );
    let mut notices = session.notices();
    let notice = tokio::time::timeout(Duration::from_secs(5), notices.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        notice,
        Notice::AuthenticationLost {
            source: "push".to_string()
        }
    );

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    session.shutdown().await;
}

#[tokio::test]
async fn dropped_connection_reconnects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/socket", listener.local_addr().unwrap());

    tokio::spawn(async move {
        // First connection: one order, then hang up.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(frame("order:new", order_json("o1", "new", T0))).await.unwrap();
        let _ = ws.close(None).await;
        drop(ws);

        // Second connection: another order.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(frame("order:new", order_json("o2", "new", T0))).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let session = Session::start_with_clock(
        Arc::new(FakeApi::new()),
        push_only(url),
        SessionClock::starting_at(T0 + 1_000),
    );
    let mut rx = session.subscribe();
    wait_for_state(&mut rx, |s| s.order("o1").is_some() && s.order("o2").is_some()).await;
    session.shutdown().await;
}
