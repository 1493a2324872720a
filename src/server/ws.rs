//! WebSocket event fan-out.
//!
//! Outbound events ride a process-wide broadcast bus as JSON envelopes
//! carrying their channel key; each connected socket forwards only the
//! envelopes addressed to the channel it subscribed with.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::debug;

use crate::events::{ChannelId, EventSink, OutboundEvent};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// One event on the bus, tagged with its routing key.
#[derive(Serialize, Deserialize)]
struct Envelope {
    channel: String,
    #[serde(flatten)]
    event: OutboundEvent,
}

/// Minimal view of an envelope for routing, payload left unparsed.
#[derive(Deserialize)]
struct ChannelProbe {
    channel: String,
}

/// Event sink backed by the broadcast bus.
#[derive(Clone)]
pub struct WsBroadcaster {
    tx: broadcast::Sender<String>,
}

impl WsBroadcaster {
    pub fn new(tx: broadcast::Sender<String>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventSink for WsBroadcaster {
    async fn publish(&self, channel: &ChannelId, event: OutboundEvent) -> Result<()> {
        let envelope = Envelope {
            channel: channel.as_str().to_string(),
            event,
        };
        let json = serde_json::to_string(&envelope).context("Failed to serialize outbound event")?;
        // No subscribers is fine; delivery is fire-and-forget.
        let _ = self.tx.send(json);
        Ok(())
    }
}

/// Serve one upgraded socket subscribed to `channel`.
///
/// Combines broadcast forwarding with ping/pong keepalive in a single select
/// loop; if no Pong arrives within [`PONG_TIMEOUT`] after a Ping, the
/// connection is considered dead and the loop exits.
pub async fn serve_socket(socket: WebSocket, rx: broadcast::Receiver<String>, channel: String) {
    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, rx, channel).await;
}

async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<String>,
    channel: String,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(envelope) => {
                        if !is_for_channel(&envelope, &channel) {
                            continue;
                        }
                        if sender.send(Message::Text(envelope.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!(missed, channel = %channel, "Socket lagged behind the event bus");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Ignore client Text/Binary/Ping frames.
                    }
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // Best-effort close frame.
    let _ = sender.send(Message::Close(None)).await;
}

fn is_for_channel(envelope: &str, channel: &str) -> bool {
    serde_json::from_str::<ChannelProbe>(envelope)
        .map(|probe| probe.channel == channel)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_envelopes_event_with_channel() {
        let (tx, mut rx) = broadcast::channel(16);
        let sink = WsBroadcaster::new(tx);

        sink.publish(
            &ChannelId::new("channel_7"),
            OutboundEvent::MessageStart {
                thread_id: "thread_1".to_string(),
            },
        )
        .await
        .unwrap();

        let envelope = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&envelope).unwrap();
        assert_eq!(value["channel"], "channel_7");
        assert_eq!(value["event"], "message_start");
        assert_eq!(value["data"]["thread_id"], "thread_1");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let (tx, _) = broadcast::channel(16);
        let sink = WsBroadcaster::new(tx);
        sink.publish(
            &ChannelId::new("nobody"),
            OutboundEvent::Error {
                message: "dropped on the floor".to_string(),
            },
        )
        .await
        .unwrap();
    }

    #[test]
    fn test_channel_filtering() {
        let envelope = r#"{"channel":"a","event":"error","data":{"message":"x"}}"#;
        assert!(is_for_channel(envelope, "a"));
        assert!(!is_for_channel(envelope, "b"));
        assert!(!is_for_channel("not json", "a"));
    }

    #[test]
    fn test_envelope_round_trips_event_payload() {
        let envelope = Envelope {
            channel: "c1".to_string(),
            event: OutboundEvent::CodeChunk {
                content: "fn f() {}".to_string(),
                file_path: "src/lib.rs".to_string(),
                thread_id: "t1".to_string(),
            },
        };
        let json = serde_json::to_string(&envelope).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.channel, "c1");
        match back.event {
            OutboundEvent::CodeChunk { file_path, .. } => assert_eq!(file_path, "src/lib.rs"),
            other => panic!("Expected CodeChunk, got {other:?}"),
        }
    }
}
