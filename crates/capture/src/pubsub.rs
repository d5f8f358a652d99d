//! PubSub notification client: maintains the persistent connection that
//! delivers "went live" / "went offline" events independently of playlist
//! polling.
//!
//! The socket, its split halves and the keepalive timer all live inside one
//! connection scope. Leaving the scope (RECONNECT directive, transport
//! error, shutdown) drops all of them before the next connect, so a
//! reconnect can never leave a second keepalive timer or a stale reader
//! behind.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use crate::config::PubSubConfig;
use crate::error::CaptureError;

/// Playback-state change reported by the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    StreamUp,
    StreamDown,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum OutboundFrame {
    #[serde(rename = "PING")]
    Ping,
    #[serde(rename = "LISTEN")]
    Listen { nonce: String, data: ListenData },
}

#[derive(Debug, Serialize)]
struct ListenData {
    topics: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum InboundFrame {
    #[serde(rename = "PONG")]
    Pong,
    #[serde(rename = "RESPONSE")]
    Response {
        nonce: Option<String>,
        error: Option<String>,
    },
    #[serde(rename = "MESSAGE")]
    Message { data: MessageData },
    #[serde(rename = "RECONNECT")]
    Reconnect,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct MessageData {
    #[allow(dead_code)]
    topic: Option<String>,
    /// Inner payload, delivered as an escaped JSON string.
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum PlaybackMessage {
    StreamUp,
    StreamDown,
    #[serde(other)]
    Other,
}

enum ConnectionOutcome {
    /// Server asked us to reconnect, or the transport went away.
    Reconnect,
    /// Shutdown was signalled or the event receiver is gone.
    Shutdown,
}

pub struct PubSubClient {
    config: Arc<PubSubConfig>,
    channel_id: String,
    event_tx: mpsc::Sender<PlaybackEvent>,
}

impl PubSubClient {
    pub fn new(
        config: Arc<PubSubConfig>,
        channel_id: String,
        event_tx: mpsc::Sender<PlaybackEvent>,
    ) -> Self {
        Self {
            config,
            channel_id,
            event_tx,
        }
    }

    fn nonce() -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(30)
            .map(char::from)
            .collect()
    }

    fn listen_frame(&self) -> OutboundFrame {
        OutboundFrame::Listen {
            nonce: Self::nonce(),
            data: ListenData {
                topics: vec![format!("video-playback-by-id.{}", self.channel_id)],
            },
        }
    }

    /// Runs the client until shutdown. Server-issued RECONNECT directives
    /// and transport errors both lead back to a fresh connect + subscribe.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), CaptureError> {
        loop {
            match self.run_connection(&mut shutdown_rx).await {
                Ok(ConnectionOutcome::Shutdown) => {
                    info!("pubsub client shutting down");
                    return Ok(());
                }
                Ok(ConnectionOutcome::Reconnect) => {
                    info!("reconnecting to pubsub edge");
                }
                Err(e) => {
                    warn!(error = %e, "pubsub connection failed, retrying");
                    tokio::time::sleep(self.config.reconnect_delay).await;
                }
            }
        }
    }

    async fn run_connection(
        &self,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<ConnectionOutcome, CaptureError> {
        let (ws_stream, _) = connect_async(self.config.endpoint.as_str()).await?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        debug!(endpoint = %self.config.endpoint, "pubsub socket opened, initiating listener");

        let listen = serde_json::to_string(&self.listen_frame())
            .map_err(|e| CaptureError::Internal(e.to_string()))?;
        ws_tx.send(Message::Text(listen.into())).await?;

        let mut keepalive = tokio::time::interval(self.config.keepalive_interval);
        keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; an instant PING after LISTEN
        // is harmless and doubles as a liveness check.
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    return Ok(ConnectionOutcome::Shutdown);
                }
                _ = keepalive.tick() => {
                    let ping = serde_json::to_string(&OutboundFrame::Ping)
                        .map_err(|e| CaptureError::Internal(e.to_string()))?;
                    ws_tx.send(Message::Text(ping.into())).await?;
                    trace!("sent keepalive ping");
                }
                frame = ws_rx.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(outcome) = self.handle_frame(text.as_str()).await? {
                                return Ok(outcome);
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            warn!("pubsub socket closed by server");
                            return Ok(ConnectionOutcome::Reconnect);
                        }
                        Some(Ok(_)) => {} // binary/ping/pong frames are not part of the protocol
                        Some(Err(e)) => return Err(CaptureError::from(e)),
                    }
                }
            }
        }
    }

    async fn handle_frame(&self, text: &str) -> Result<Option<ConnectionOutcome>, CaptureError> {
        let frame: InboundFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, raw = text, "undecodable pubsub frame");
                return Ok(None);
            }
        };

        match frame {
            InboundFrame::Pong => trace!("keepalive pong"),
            InboundFrame::Response { nonce, error } => {
                // Informational only; capture never blocks on the ack.
                match error.filter(|e| !e.is_empty()) {
                    Some(error) => warn!(?nonce, error, "listen request rejected"),
                    None => debug!(?nonce, "listen request acknowledged"),
                }
            }
            InboundFrame::Reconnect => {
                info!("server issued reconnect directive");
                return Ok(Some(ConnectionOutcome::Reconnect));
            }
            InboundFrame::Message { data } => {
                match serde_json::from_str::<PlaybackMessage>(&data.message) {
                    Ok(PlaybackMessage::StreamUp) => {
                        if self.event_tx.send(PlaybackEvent::StreamUp).await.is_err() {
                            return Ok(Some(ConnectionOutcome::Shutdown));
                        }
                    }
                    Ok(PlaybackMessage::StreamDown) => {
                        if self.event_tx.send(PlaybackEvent::StreamDown).await.is_err() {
                            return Ok(Some(ConnectionOutcome::Shutdown));
                        }
                    }
                    Ok(PlaybackMessage::Other) => {
                        trace!(message = %data.message, "ignoring playback message");
                    }
                    Err(e) => warn!(error = %e, "undecodable playback message"),
                }
            }
            InboundFrame::Unknown => trace!(raw = text, "ignoring unknown frame type"),
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_frame_wire_shape() {
        let client = PubSubClient::new(
            Arc::new(PubSubConfig::default()),
            "1234567".to_string(),
            mpsc::channel(1).0,
        );
        let json = serde_json::to_string(&client.listen_frame()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "LISTEN");
        assert_eq!(value["data"]["topics"][0], "video-playback-by-id.1234567");
        assert_eq!(value["nonce"].as_str().unwrap().len(), 30);
    }

    #[test]
    fn ping_frame_wire_shape() {
        let json = serde_json::to_string(&OutboundFrame::Ping).unwrap();
        assert_eq!(json, r#"{"type":"PING"}"#);
    }

    #[test]
    fn inbound_frames_decode() {
        assert!(matches!(
            serde_json::from_str::<InboundFrame>(r#"{"type":"PONG"}"#).unwrap(),
            InboundFrame::Pong
        ));
        assert!(matches!(
            serde_json::from_str::<InboundFrame>(r#"{"type":"RECONNECT"}"#).unwrap(),
            InboundFrame::Reconnect
        ));
        let response: InboundFrame =
            serde_json::from_str(r#"{"type":"RESPONSE","nonce":"abc","error":""}"#).unwrap();
        match response {
            InboundFrame::Response { nonce, error } => {
                assert_eq!(nonce.as_deref(), Some("abc"));
                assert_eq!(error.as_deref(), Some(""));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        // Frame types outside the protocol are tolerated.
        assert!(matches!(
            serde_json::from_str::<InboundFrame>(r#"{"type":"AUDIT"}"#).unwrap(),
            InboundFrame::Unknown
        ));
    }

    #[test]
    fn stream_state_messages_decode() {
        let frame: InboundFrame = serde_json::from_str(
            r#"{"type":"MESSAGE","data":{"topic":"video-playback-by-id.123",
                "message":"{\"type\":\"stream-up\",\"server_time\":1.0,\"play_delay\":0}"}}"#,
        )
        .unwrap();
        let InboundFrame::Message { data } = frame else {
            panic!("expected MESSAGE frame");
        };
        assert!(matches!(
            serde_json::from_str::<PlaybackMessage>(&data.message).unwrap(),
            PlaybackMessage::StreamUp
        ));

        assert!(matches!(
            serde_json::from_str::<PlaybackMessage>(r#"{"type":"stream-down"}"#).unwrap(),
            PlaybackMessage::StreamDown
        ));
        // Viewcount updates arrive on the same topic and are ignored.
        assert!(matches!(
            serde_json::from_str::<PlaybackMessage>(r#"{"type":"viewcount","viewers":10}"#)
                .unwrap(),
            PlaybackMessage::Other
        ));
    }
}
