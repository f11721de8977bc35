//! Integration tests for demo mode.
//!
//! These run against the public client API only; no server is involved.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{timeout, Instant};
use tutorlink_client::{ClientConfig, ClientEvent, ConnectionState, Mode, TutorClient, TutorReply};

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

#[tokio::test]
async fn test_demo_reply_without_errors_for_full_sentence() {
    let client = TutorClient::new(ClientConfig::demo()).unwrap();
    let mut events = client.subscribe();

    let start = Instant::now();
    assert!(client.send("hello world", "en-US", "B1").unwrap());
    let reply = next_reply(&mut events).await;
    let elapsed = start.elapsed();

    assert!(reply.errors.is_empty());
    assert!(reply.reply.contains("hello world"));
    assert_eq!(reply.cefr.as_deref(), Some("B1"));
    assert!(elapsed >= Duration::from_millis(350), "replied after {elapsed:?}");
    // Generous upper bound for scheduler jitter on busy CI machines.
    assert!(elapsed < Duration::from_millis(1300), "replied after {elapsed:?}");
}

#[tokio::test]
async fn test_demo_reply_flags_short_answer() {
    let client = TutorClient::new(ClientConfig::demo()).unwrap();
    let mut events = client.subscribe();

    client.send("hi", "en-US", "A1").unwrap();
    let reply = next_reply(&mut events).await;

    assert_eq!(reply.errors.len(), 1);
}

#[tokio::test]
async fn test_whitespace_only_input_prompts_again() {
    let client = TutorClient::new(ClientConfig::demo()).unwrap();
    let mut events = client.subscribe();

    assert!(client.send("   ", "en-US", "A1").unwrap());
    let reply = next_reply(&mut events).await;

    assert_eq!(reply.errors.len(), 1);
    assert!(!reply.reply.contains("You said"));
}

#[tokio::test]
async fn test_empty_send_produces_nothing() {
    let client = TutorClient::new(ClientConfig::demo()).unwrap();
    let mut events = client.subscribe();

    assert!(!client.send("", "en-US", "B1").unwrap());

    let outcome = timeout(Duration::from_millis(1000), events.recv()).await;
    assert!(outcome.is_err(), "expected no events, got {outcome:?}");
    assert!(client.status().last_reply.is_none());
}

#[tokio::test]
async fn test_demo_mode_never_opens_transport() {
    // Unroutable address; a connect attempt would record an error.
    let config = ClientConfig {
        mode: Mode::Demo,
        ..ClientConfig::with_url("ws://192.0.2.1:9")
    };
    let client = TutorClient::new(config).unwrap();
    let mut events = client.subscribe();

    client.connect().unwrap();
    client.send("good morning", "fr-FR", "A2").unwrap();
    let reply = next_reply(&mut events).await;

    let status = client.status();
    assert_eq!(status.state, ConnectionState::Demo);
    assert!(status.last_error.is_none());
    assert!(reply.hint.is_some());
}

#[tokio::test]
async fn test_switching_to_demo_at_runtime() {
    let client = TutorClient::new(ClientConfig::with_url("ws://127.0.0.1:1")).unwrap();
    let mut events = client.subscribe();

    client.set_mode(Mode::Demo).unwrap();
    client.send("switching modes now", "de-DE", "B2").unwrap();
    let reply = next_reply(&mut events).await;

    assert!(reply.hint.unwrap().contains("Verbstellung"));
    assert_eq!(client.status().mode, Mode::Demo);
}
