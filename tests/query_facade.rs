//! End-to-end exercise of the Query Façade against a local WebSocket
//! listener standing in for the real WhatsApp Web endpoint.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use whatsapp_wire::{ConnectOptions, Connection, DisconnectReason, Event, InboundPayload, Query};

/// Accepts one connection, answers every `"<tag>,[...]"` frame it receives
/// with a canned `{"status":200,"echo":true}` reply under the same tag.
async fn spawn_echo_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                let tag = text.split(',').next().unwrap_or_default();
                let reply = format!(r#"{},{{"status":200,"echo":true}}"#, tag);
                if ws.send(Message::Text(reply)).await.is_err() {
                    break;
                }
            }
        }
    });

    format!("ws://{}/ws", addr)
}

#[tokio::test]
async fn query_round_trips_through_a_real_websocket() {
    let mut options = ConnectOptions::default();
    options.endpoint = spawn_echo_server().await;
    let conn = Connection::connect(options, None);

    conn.wait_for_connection(Some(Duration::from_secs(2)))
        .await
        .expect("server should accept and upgrade promptly");

    let mut query = Query::default();
    query.requires_phone = false;
    query.json = json::array!["admin", "test"];

    let payload = conn.query(query).await.expect("query should be answered");
    match payload {
        InboundPayload::Json(value) => assert_eq!(value["echo"], true),
        InboundPayload::Binary(_) => panic!("expected a JSON reply"),
    }
}

#[tokio::test]
async fn concurrent_queries_on_cloned_handles_get_distinct_replies() {
    let mut options = ConnectOptions::default();
    options.endpoint = spawn_echo_server().await;
    let conn = Connection::connect(options, None);
    conn.wait_for_connection(Some(Duration::from_secs(2)))
        .await
        .unwrap();

    let a = conn.clone();
    let b = conn.clone();

    let make_query = || {
        let mut q = Query::default();
        q.requires_phone = false;
        q.json = json::array!["admin", "test"];
        q
    };

    let (ra, rb) = tokio::join!(a.query(make_query()), b.query(make_query()));
    assert!(matches!(ra.unwrap(), InboundPayload::Json(_)));
    assert!(matches!(rb.unwrap(), InboundPayload::Json(_)));
}

#[tokio::test]
async fn close_emits_close_event_and_fails_pending_waiters() {
    let mut options = ConnectOptions::default();
    // Nobody answers this listener's connections; the query below must be
    // rejected by `close()` rather than hang.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let _ws = accept_async(stream).await.unwrap();
        // Accept the upgrade but never reply to anything.
        std::future::pending::<()>().await;
    });
    options.endpoint = format!("ws://{}/ws", addr);
    let conn = Connection::connect(options, None);
    conn.wait_for_connection(Some(Duration::from_secs(2)))
        .await
        .unwrap();

    let seen_close = std::sync::Arc::new(std::sync::Mutex::new(false));
    let seen_close_clone = seen_close.clone();
    conn.subscribe(move |event| {
        if let Event::Close { .. } = event {
            *seen_close_clone.lock().unwrap() = true;
        }
    });

    let mut query = Query::default();
    query.requires_phone = false;
    query.json = json::array!["admin", "test"];
    query.timeout = Some(Duration::from_secs(5));

    let pending = tokio::spawn({
        let conn = conn.clone();
        async move { conn.query(query).await }
    });

    conn.close();
    let result = pending.await.unwrap();
    assert!(result.is_err());
    assert!(*seen_close.lock().unwrap());
}

/// Accepts two connections in turn: the first replies `{"status":599}` to
/// whatever it's sent and then drops, the second echoes `status:200` like
/// `spawn_echo_server`. Stands in for a reconnect cycle.
async fn spawn_reconnect_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                let tag = text.split(',').next().unwrap_or_default();
                let reply = format!(r#"{},{{"status":599}}"#, tag);
                let _ = ws.send(Message::Text(reply)).await;
            }
        }

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                let tag = text.split(',').next().unwrap_or_default();
                let reply = format!(r#"{},{{"status":200,"echo":true}}"#, tag);
                if ws.send(Message::Text(reply)).await.is_err() {
                    break;
                }
            }
        }
    });

    format!("ws://{}/ws", addr)
}

#[tokio::test]
async fn server_599_forces_a_reconnect_and_resends_the_same_query() {
    tokio::time::pause();

    let mut options = ConnectOptions::default();
    options.max_retries = 2;
    options.endpoint = spawn_reconnect_server().await;
    let conn = Connection::connect(options, None);
    conn.wait_for_connection(Some(Duration::from_secs(2)))
        .await
        .expect("server should accept and upgrade promptly");

    let mut query = Query::default();
    query.requires_phone = false;
    query.expect_2xx = true;
    query.json = json::array!["admin", "test"];
    query.timeout = Some(Duration::from_secs(2));

    let payload = conn
        .query(query)
        .await
        .expect("the 599 reply should trigger exactly one reconnect+retry that then succeeds");
    match payload {
        InboundPayload::Json(value) => assert_eq!(value["echo"], true),
        InboundPayload::Binary(_) => panic!("expected a JSON reply"),
    }
}

/// Accepts one connection and records every text frame it receives, never
/// replying to any of them.
async fn spawn_recording_server() -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let frames = Arc::new(Mutex::new(Vec::new()));
    let frames_clone = frames.clone();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                frames_clone.lock().unwrap().push(text);
            }
        }
    });

    (format!("ws://{}/ws", addr), frames)
}

#[tokio::test]
async fn requires_phone_query_arms_a_phone_probe_frame_and_event() {
    tokio::time::pause();

    let mut options = ConnectOptions::default();
    options.phone_response_ms = 50;
    let (endpoint, frames) = spawn_recording_server().await;
    options.endpoint = endpoint;
    let conn = Connection::connect(options, None);
    conn.wait_for_connection(Some(Duration::from_secs(2)))
        .await
        .unwrap();

    let phone_events = Arc::new(Mutex::new(Vec::new()));
    let phone_events_clone = phone_events.clone();
    conn.subscribe(move |event| {
        if let Event::PhoneChange { connected } = event {
            phone_events_clone.lock().unwrap().push(*connected);
        }
    });

    let mut query = Query::default();
    query.requires_phone = true;
    query.expect_2xx = false;
    query.json = json::array!["query", "that", "nobody", "answers"];
    query.timeout = None;

    // Nothing ever answers this tag; we only care about the side effects
    // arming it has on the phone-probe interval.
    tokio::spawn({
        let conn = conn.clone();
        async move {
            let _ = conn.query(query).await;
        }
    });

    tokio::time::advance(Duration::from_millis(60)).await;
    tokio::task::yield_now().await;

    assert_eq!(*phone_events.lock().unwrap(), vec![false]);
    let sent = frames.lock().unwrap();
    assert!(
        sent.iter().any(|f| f.contains(r#"["admin","test"]"#)),
        "expected a phone-probe frame, got {:?}",
        *sent
    );
}

#[tokio::test]
async fn idle_timeout_closes_with_timed_out_reason_and_rejects_the_waiter() {
    tokio::time::pause();

    let mut options = ConnectOptions::default();
    options.max_idle_ms = 50;
    let (endpoint, _frames) = spawn_recording_server().await;
    options.endpoint = endpoint;
    let conn = Connection::connect(options, None);
    conn.wait_for_connection(Some(Duration::from_secs(2)))
        .await
        .unwrap();

    let close_reason = Arc::new(Mutex::new(None));
    let close_reason_clone = close_reason.clone();
    conn.subscribe(move |event| {
        if let Event::WsClose { reason } = event {
            *close_reason_clone.lock().unwrap() = Some(*reason);
        }
    });

    let mut query = Query::default();
    query.requires_phone = false;
    query.expect_2xx = false;
    query.start_debounce = true;
    query.json = json::array!["admin", "test"];
    query.timeout = Some(Duration::from_secs(5));

    let pending = tokio::spawn({
        let conn = conn.clone();
        async move { conn.query(query).await }
    });

    tokio::time::advance(Duration::from_millis(60)).await;

    let result = pending.await.unwrap();
    assert!(result.is_err(), "waiter should be rejected once the idle timer fires");
    assert_eq!(*close_reason.lock().unwrap(), Some(DisconnectReason::TimedOut));
}
