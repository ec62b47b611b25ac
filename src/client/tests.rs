use super::Client;
use crate::broker::{Broker, BrokerHandle, Message, Payload, Value};
use crate::config::Settings;
use crate::utils::BrokerError;
use std::time::Duration;

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.server.send_port = 0;
    settings.server.fetch_port = 0;
    settings.broker.max_msg_size = 128;
    settings.broker.dispatch_interval_ms = 20;
    settings.broker.read_timeout_ms = 500;
    settings.client.timeout_ms = 1000;
    settings
}

async fn start() -> (BrokerHandle, Client) {
    let settings = test_settings();
    let handle = Broker::new(settings.clone()).start().await.unwrap();
    let client = Client::new(
        handle.send_addr().to_string(),
        handle.fetch_addr().to_string(),
        settings.broker.max_msg_size,
        settings.client.clone(),
    );
    (handle, client)
}

#[test]
fn test_client_from_settings() {
    let client = Client::from_settings(&Settings::default());
    assert_eq!(client.send_addr(), "127.0.0.1:18888");
    assert_eq!(client.fetch_addr(), "127.0.0.1:18889");
}

#[tokio::test]
async fn test_send_rejects_oversized_message_before_connecting() {
    // nothing listens on port 9; the size check must fail first
    let client = Client::new("127.0.0.1:9", "127.0.0.1:9", 32, test_settings().client);
    let mut payload = Payload::new();
    payload.insert("note".to_string(), Value::from("x".repeat(64)));
    let msg = Message::new(1, "sim.l.1", "sim.b", payload).unwrap();

    assert!(matches!(
        client.send_msg(&msg).await,
        Err(BrokerError::MessageTooLarge { max: 32, .. })
    ));
}

#[tokio::test]
async fn test_fetch_rejects_invalid_destination() {
    let client = Client::from_settings(&test_settings());
    assert!(matches!(
        client.fetch_next_msg("").await,
        Err(BrokerError::MalformedMessage { .. })
    ));
    assert!(matches!(
        client.fetch_next_msg("sim\nb").await,
        Err(BrokerError::MalformedMessage { .. })
    ));
}

#[tokio::test]
async fn test_send_then_fetch() {
    let (handle, client) = start().await;
    let msg = Message::new(6000, "sim.l.7357", "sim.b", Payload::new()).unwrap();

    client.send_msg(&msg).await.unwrap();

    let mut fetched = None;
    for _ in 0..50 {
        fetched = client.fetch_next_msg("sim.b").await.unwrap();
        if fetched.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(fetched, Some(msg));

    handle.shutdown().await;
}

#[tokio::test]
async fn test_send_frame_reports_every_response() {
    let (handle, client) = start().await;

    let responses = client.send_frame("0102").await.unwrap();
    assert_eq!(responses.len(), 3);
    assert_eq!(responses.last().map(|r| r.as_str()), Some("FAIL"));

    handle.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_broker_is_an_error() {
    let (handle, client) = start().await;
    handle.shutdown().await;

    let msg = Message::new(6000, "sim.l.7357", "sim.b", Payload::new()).unwrap();
    assert!(client.send_msg(&msg).await.is_err());
}
