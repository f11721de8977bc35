//! Integration tests for the tutor client against a live WebSocket server.
//!
//! A mock tutor runs in-process on an ephemeral port. Its behavior is driven
//! by the utterance text, so each test picks a scenario by what it sends.

use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tower_http::trace::TraceLayer;
use tutorlink_client::{
    ClientConfig, ClientError, ClientEvent, ClientStatus, ConnectionState, Mode, TransportErrorKind,
    TutorClient, TutorReply,
};

// ============================================================================
// Mock Tutor
// ============================================================================

#[derive(Clone, Default)]
struct MockTutor {
    connections: Arc<AtomicUsize>,
    pings: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<String>>>,
}

impl MockTutor {
    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    fn received(&self) -> Vec<String> {
        self.received.lock().expect("lock poisoned").clone()
    }
}

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Spawns the mock tutor on `port` and returns its shared state.
async fn spawn_mock_tutor_on(port: u16) -> (MockTutor, tokio::task::JoinHandle<()>) {
    let tutor = MockTutor::default();
    let router = Router::new()
        .route("/realtime", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(tutor.clone());

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .expect("Failed to bind");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (tutor, handle)
}

async fn spawn_mock_tutor() -> (MockTutor, String, tokio::task::JoinHandle<()>) {
    let port = find_available_port();
    let (tutor, handle) = spawn_mock_tutor_on(port).await;
    (tutor, format!("ws://127.0.0.1:{port}/realtime"), handle)
}

async fn ws_handler(ws: WebSocketUpgrade, State(tutor): State<MockTutor>) -> impl IntoResponse {
    tutor.connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| serve_learner(socket, tutor))
}

async fn serve_learner(socket: WebSocket, tutor: MockTutor) {
    let (mut sink, mut stream) = socket.split();

    while let Some(Ok(message)) = stream.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Ping(_) => {
                tutor.pings.fetch_add(1, Ordering::SeqCst);
                continue;
            }
            Message::Close(_) => return,
            _ => continue,
        };

        let request: Value = serde_json::from_str(&text).expect("client sent invalid JSON");
        let utterance = request["text"].as_str().unwrap_or_default().to_string();
        tutor
            .received
            .lock()
            .expect("lock poisoned")
            .push(utterance.clone());

        let frames = match utterance.as_str() {
            "malformed" => vec![
                json!({"type": "tutor", "hint": "no reply here"}),
                json!({"type": "tutor", "reply": "after malformed"}),
            ],
            "server error" => vec![json!({"type": "error", "reason": "quota exceeded"})],
            "unknown" => vec![json!({"type": "telemetry", "load": 0.4})],
            "echo me" => vec![json!({"type": "echo", "payload": request})],
            "echo text" => vec![json!({"type": "echo", "text": "echoed words"})],
            "ping" => vec![json!({"type": "ping"})],
            "bye" => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::NORMAL,
                        reason: "session over".into(),
                    })))
                    .await;
                return;
            }
            // Drops the TCP connection without a close frame.
            "crash" => return,
            _ => vec![json!({
                "type": "tutor",
                "reply": format!("You said: {utterance}"),
                "hint": "Keep going",
                "errors": [],
                "cefr": request["level"],
            })],
        };

        for frame in frames {
            if sink.send(Message::Text(frame.to_string())).await.is_err() {
                return;
            }
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn live_config(url: &str) -> ClientConfig {
    ClientConfig {
        mode: Mode::Live,
        min_backoff_ms: 100,
        max_backoff_ms: 400,
        ..ClientConfig::with_url(url)
    }
}

async fn wait_for(
    client: &TutorClient,
    predicate: impl Fn(&ClientStatus) -> bool,
) -> ClientStatus {
    let mut status = client.watch_status();
    let found = timeout(Duration::from_secs(10), status.wait_for(|s| predicate(s)))
        .await
        .expect("Timeout waiting for status")
        .expect("Client stopped")
        .clone();
    found
}

async fn wait_for_state(
    client: &TutorClient,
    predicate: impl Fn(&ConnectionState) -> bool,
) -> ClientStatus {
    wait_for(client, |s| predicate(&s.state)).await
}

async fn next_reply(events: &mut broadcast::Receiver<ClientEvent>) -> TutorReply {
    loop {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("Timeout waiting for reply")
            .expect("Event stream closed");
        if let ClientEvent::Reply(reply) = event {
            return reply;
        }
    }
}

async fn connected_client(url: &str) -> (TutorClient, broadcast::Receiver<ClientEvent>) {
    let client = TutorClient::new(ClientConfig::with_url(url)).expect("valid config");
    let events = client.subscribe();
    client.connect().expect("driver running");
    wait_for_state(&client, ConnectionState::is_connected).await;
    (client, events)
}

// ============================================================================
// Delivery Tests
// ============================================================================

#[tokio::test]
async fn test_reply_delivered_from_live_tutor() {
    let (_tutor, url, _handle) = spawn_mock_tutor().await;
    let (client, mut events) = connected_client(&url).await;

    assert!(client.send("I like trains", "en-US", "B2").unwrap());
    let reply = next_reply(&mut events).await;

    assert_eq!(reply.reply, "You said: I like trains");
    assert_eq!(reply.hint.as_deref(), Some("Keep going"));
    assert_eq!(reply.cefr.as_deref(), Some("B2"));
    assert!(reply.errors.is_empty());

    let status = client.status();
    assert_eq!(status.last_reply, Some(reply));
    assert_eq!(status.reconnect_attempt, 0);
    assert!(status.last_error.is_none());
}

#[tokio::test]
async fn test_environment_identifier_reaches_loopback_tutor() {
    let port = find_available_port();
    let (tutor, _handle) = spawn_mock_tutor_on(port).await;

    let client =
        TutorClient::new(ClientConfig::with_environment(format!("127.0.0.1:{port}"))).unwrap();
    client.connect().unwrap();
    wait_for_state(&client, ConnectionState::is_connected).await;

    assert_eq!(tutor.connections(), 1);
}

#[tokio::test]
async fn test_queued_messages_flush_in_order() {
    let (tutor, url, _handle) = spawn_mock_tutor().await;
    let client = TutorClient::new(ClientConfig::with_url(&url)).unwrap();
    let mut events = client.subscribe();

    for text in ["one", "two", "three"] {
        client.send(text, "en-US", "A2").unwrap();
    }
    wait_for(&client, |s| s.pending == 3).await;

    client.connect().unwrap();
    let status = wait_for_state(&client, ConnectionState::is_connected).await;
    assert_eq!(status.pending, 0);

    let mut replies = Vec::new();
    for _ in 0..3 {
        replies.push(next_reply(&mut events).await.reply);
    }

    assert_eq!(tutor.received(), vec!["one", "two", "three"]);
    assert_eq!(
        replies,
        vec!["You said: one", "You said: two", "You said: three"]
    );
}

// ============================================================================
// Inbound Frame Tests
// ============================================================================

#[tokio::test]
async fn test_malformed_frame_is_reported_and_loop_continues() {
    let (_tutor, url, _handle) = spawn_mock_tutor().await;
    let (client, mut events) = connected_client(&url).await;

    client.send("malformed", "en-US", "B1").unwrap();

    let mut saw_decode_error = false;
    let reply = loop {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            ClientEvent::Error(error) if error.kind == "decoding_failed" => saw_decode_error = true,
            ClientEvent::Reply(reply) => break reply,
            _ => {}
        }
    };

    assert!(saw_decode_error);
    assert_eq!(reply.reply, "after malformed");
    assert_eq!(client.status().state, ConnectionState::Connected);
}

#[tokio::test]
async fn test_server_error_keeps_connection_open() {
    let (_tutor, url, _handle) = spawn_mock_tutor().await;
    let (client, _events) = connected_client(&url).await;

    client.send("server error", "en-US", "B1").unwrap();
    let status = wait_for(&client, |s| s.last_error.is_some()).await;

    assert_eq!(
        status.last_error,
        Some(ClientError::server("quota exceeded"))
    );
    assert_eq!(status.state, ConnectionState::Connected);
}

#[tokio::test]
async fn test_unknown_type_produces_no_reply() {
    let (_tutor, url, _handle) = spawn_mock_tutor().await;
    let (client, mut events) = connected_client(&url).await;

    client.send("unknown", "en-US", "B1").unwrap();
    client.send("afterwards", "en-US", "B1").unwrap();

    let reply = next_reply(&mut events).await;
    assert_eq!(reply.reply, "You said: afterwards");
    assert!(client.status().last_error.is_none());
}

#[tokio::test]
async fn test_echo_with_wrapped_message_is_acknowledged_locally() {
    let (_tutor, url, _handle) = spawn_mock_tutor().await;
    let (client, mut events) = connected_client(&url).await;

    client.send("echo me", "es-ES", "A2").unwrap();
    let reply = next_reply(&mut events).await;

    assert!(reply.reply.contains("echo me"));
    assert_eq!(reply.cefr.as_deref(), Some("A2"));
    assert!(reply.hint.is_some());
}

#[tokio::test]
async fn test_echo_with_text_becomes_reply() {
    let (_tutor, url, _handle) = spawn_mock_tutor().await;
    let (client, mut events) = connected_client(&url).await;

    client.send("echo text", "en-US", "B1").unwrap();
    let reply = next_reply(&mut events).await;

    assert_eq!(reply.reply, "echoed words");
    assert!(reply.errors.is_empty());
}

#[tokio::test]
async fn test_ping_envelope_sends_ws_ping() {
    let (tutor, url, _handle) = spawn_mock_tutor().await;
    let (client, _events) = connected_client(&url).await;

    client.send("ping", "en-US", "B1").unwrap();

    timeout(Duration::from_secs(5), async {
        while tutor.pings.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("Tutor never received a ping");
    assert_eq!(client.status().state, ConnectionState::Connected);
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_normal_close_disconnects_without_reconnect() {
    let (tutor, url, _handle) = spawn_mock_tutor().await;
    let client = TutorClient::new(live_config(&url)).unwrap();
    client.connect().unwrap();
    wait_for_state(&client, ConnectionState::is_connected).await;

    client.send("bye", "en-US", "B1").unwrap();
    wait_for_state(&client, |s| *s == ConnectionState::Disconnected).await;

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(tutor.connections(), 1);
    assert_eq!(client.status().state, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_abnormal_close_reconnects_and_resets_attempts() {
    let (tutor, url, _handle) = spawn_mock_tutor().await;
    let client = TutorClient::new(live_config(&url)).unwrap();
    let mut status_rx = client.watch_status();
    client.connect().unwrap();
    wait_for_state(&client, ConnectionState::is_connected).await;

    client.send("crash", "en-US", "B1").unwrap();

    let reconnecting = timeout(
        Duration::from_secs(5),
        status_rx.wait_for(|s| matches!(s.state, ConnectionState::Reconnecting { .. })),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert_eq!(reconnecting.reconnect_attempt, 1);

    let status = wait_for_state(&client, ConnectionState::is_connected).await;
    assert_eq!(status.reconnect_attempt, 0);
    assert!(status.last_error.is_none());
    assert_eq!(tutor.connections(), 2);
}

#[tokio::test]
async fn test_explicit_disconnect_stops_reconnects() {
    // Accepts TCP and hangs up immediately, so every handshake fails.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepts = Arc::new(AtomicUsize::new(0));
    let counter = accepts.clone();
    let _server = tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(socket);
        }
    });

    let client = TutorClient::new(live_config(&format!("ws://127.0.0.1:{port}"))).unwrap();
    client.connect().unwrap();
    wait_for(&client, |s| s.reconnect_attempt >= 2).await;

    client.disconnect().unwrap();
    wait_for_state(&client, |s| *s == ConnectionState::Disconnected).await;
    let before = accepts.load(Ordering::SeqCst);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(accepts.load(Ordering::SeqCst), before);
    assert_eq!(client.status().state, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_second_connect_cancels_handshake_in_flight() {
    // Hands every accepted socket to the test without answering it.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (sockets_tx, mut sockets) = mpsc::unbounded_channel();
    let _server = tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            if sockets_tx.send(socket).is_err() {
                break;
            }
        }
    });

    let client = TutorClient::new(live_config(&format!("ws://127.0.0.1:{port}"))).unwrap();
    client.connect().unwrap();
    let mut first = timeout(Duration::from_secs(5), sockets.recv())
        .await
        .unwrap()
        .unwrap();

    client.connect().unwrap();
    let second = timeout(Duration::from_secs(5), sockets.recv())
        .await
        .unwrap()
        .unwrap();

    // The abandoned attempt hangs up after its upgrade request.
    let drained = timeout(Duration::from_secs(5), async {
        let mut buf = [0u8; 1024];
        loop {
            match first.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
    assert!(drained.is_ok(), "first handshake was not cancelled");

    let _server_side = tokio_tungstenite::accept_async(second)
        .await
        .expect("second handshake failed");
    let status = wait_for_state(&client, ConnectionState::is_connected).await;
    assert_eq!(status.reconnect_attempt, 0);
    assert!(status.last_error.is_none());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(client.status().state, ConnectionState::Connected);
}

// ============================================================================
// Failure Policy Tests
// ============================================================================

#[tokio::test]
async fn test_unreachable_host_in_automatic_mode_falls_back_to_demo() {
    let port = find_available_port();
    let client = TutorClient::new(ClientConfig::with_url(format!("ws://127.0.0.1:{port}"))).unwrap();
    let mut events = client.subscribe();
    client.connect().unwrap();

    let status = wait_for_state(&client, ConnectionState::is_demo).await;
    assert!(status.demo_fallback);
    assert_eq!(
        status.last_error.and_then(|e| e.transport_kind()),
        Some(TransportErrorKind::HostUnreachable)
    );

    client.send("hello world", "en-US", "B1").unwrap();
    let reply = next_reply(&mut events).await;
    assert!(reply.errors.is_empty());
    assert!(reply.reply.contains("hello world"));
}

#[tokio::test]
async fn test_unreachable_host_in_live_mode_schedules_reconnect() {
    let port = find_available_port();
    let config = ClientConfig {
        mode: Mode::Live,
        ..ClientConfig::with_url(format!("ws://127.0.0.1:{port}"))
    };
    let client = TutorClient::new(config).unwrap();
    client.connect().unwrap();

    let status =
        wait_for_state(&client, |s| matches!(s, ConnectionState::Reconnecting { .. })).await;
    let ConnectionState::Reconnecting { delay } = status.state else {
        unreachable!()
    };

    assert_eq!(status.reconnect_attempt, 1);
    assert!(!status.demo_fallback);
    assert!(delay >= Duration::from_secs(1));
    assert!(delay <= Duration::from_millis(1250));
}

#[tokio::test]
async fn test_reconnect_delays_stay_within_bounds() {
    let port = find_available_port();
    let client = TutorClient::new(live_config(&format!("ws://127.0.0.1:{port}"))).unwrap();
    let mut events = client.subscribe();
    client.connect().unwrap();

    let mut delays = Vec::new();
    while delays.len() < 4 {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        if let ClientEvent::StateChanged(ConnectionState::Reconnecting { delay }) = event {
            delays.push(delay);
        }
    }

    for delay in delays {
        assert!(delay >= Duration::from_millis(100), "{delay:?} below minimum");
        assert!(delay <= Duration::from_millis(400), "{delay:?} above maximum");
    }
}

#[tokio::test]
async fn test_explicit_connect_after_fallback_retries_live() {
    let port = find_available_port();
    let client = TutorClient::new(ClientConfig::with_url(format!("ws://127.0.0.1:{port}"))).unwrap();
    client.connect().unwrap();
    wait_for_state(&client, ConnectionState::is_demo).await;

    let (tutor, _handle) = spawn_mock_tutor_on(port).await;
    client.connect().unwrap();

    let status = wait_for_state(&client, ConnectionState::is_connected).await;
    assert!(!status.demo_fallback);
    assert_eq!(tutor.connections(), 1);
}
