// Connection management for remindersync.
// Owns the WebSocket transport: connect/reconnect policy with backoff,
// heartbeats, the outbound command queue, and the hand-off of validated
// inbound frames into the engine's serialized event channel.

use anyhow::{anyhow, Result};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use crate::sync::{validator, EngineEvent};

const CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const RECONNECT_BACKOFF_CAP: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Outbound requests to the server. Each is a plain request/response; none
/// of them are part of the merge engine's concurrency domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    RequestInitialState { date: String },
    Ping,
    Restart,
    Destroy,
    Logout,
}

impl Command {
    /// Wire representation: `{"type": ..., "id": ..., "data": {...}}`.
    pub fn to_wire(&self) -> Value {
        let id = Uuid::new_v4().to_string();
        match self {
            Command::RequestInitialState { date } => json!({
                "type": "request_initial_state",
                "id": id,
                "data": { "date": date },
            }),
            Command::Ping => json!({ "type": "ping", "id": id }),
            Command::Restart => json!({ "type": "restart", "id": id }),
            Command::Destroy => json!({ "type": "destroy", "id": id }),
            Command::Logout => json!({ "type": "logout", "id": id }),
        }
    }
}

/// Drives one WebSocket connection at a time, reconnecting forever until the
/// command channel closes. Inbound frames are validated and forwarded into
/// the engine channel; engine state is never touched from here.
pub struct ConnectionManager {
    url: String,
    engine_tx: mpsc::Sender<EngineEvent>,
    command_rx: mpsc::Receiver<Command>,
}

impl ConnectionManager {
    pub fn new(
        url: impl Into<String>,
        engine_tx: mpsc::Sender<EngineEvent>,
        command_rx: mpsc::Receiver<Command>,
    ) -> Self {
        ConnectionManager {
            url: url.into(),
            engine_tx,
            command_rx,
        }
    }

    /// Run until the engine side goes away. Transport loss is never fatal:
    /// every drop leads to a reconnect, and every reconnect makes the engine
    /// rerun reconciliation.
    pub async fn run(mut self) {
        let mut cycle: u32 = 0;
        loop {
            match self.connect_with_retries().await {
                Ok(ws) => {
                    cycle = 0;
                    if self.engine_tx.send(EngineEvent::Connected).await.is_err() {
                        return;
                    }
                    match self.drive(ws).await {
                        SessionEnd::EngineClosed => return,
                        SessionEnd::TransportLost => {
                            if self.engine_tx.send(EngineEvent::Disconnected).await.is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("Connection cycle failed: {}", e);
                }
            }
            cycle = cycle.saturating_add(1);
            let backoff = reconnect_backoff(cycle);
            info!("Reconnecting in {:?}", backoff);
            tokio::time::sleep(backoff).await;
        }
    }

    async fn connect_with_retries(&self) -> Result<WsStream> {
        let mut last_error = None;
        for attempt in 1..=CONNECT_ATTEMPTS {
            info!(
                "Connecting to {} (attempt {}/{})",
                self.url, attempt, CONNECT_ATTEMPTS
            );
            match tokio::time::timeout(CONNECT_TIMEOUT, connect_async(self.url.as_str())).await {
                Ok(Ok((ws, _response))) => {
                    info!("Connected to {}", self.url);
                    return Ok(ws);
                }
                Ok(Err(e)) => {
                    error!("Failed to connect on attempt {}: {}", attempt, e);
                    last_error = Some(anyhow!("connect failed: {}", e));
                }
                Err(_) => {
                    error!("Connect attempt {} timed out", attempt);
                    last_error = Some(anyhow!("connect timed out after {:?}", CONNECT_TIMEOUT));
                }
            }
            if attempt < CONNECT_ATTEMPTS {
                let backoff = attempt_backoff(attempt);
                info!("Retrying connection in {:?}", backoff);
                tokio::time::sleep(backoff).await;
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow!("failed to connect to {}", self.url)))
    }

    /// Pump one established connection: inbound frames, queued commands, and
    /// the heartbeat, until the transport drops or the engine side closes.
    async fn drive(&mut self, mut ws: WsStream) -> SessionEnd {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it.
        heartbeat.tick().await;

        loop {
            tokio::select! {
                inbound = ws.next() => match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        if !self.forward_text(&text).await {
                            return SessionEnd::EngineClosed;
                        }
                    }
                    Some(Ok(WsMessage::Ping(payload))) => {
                        if ws.send(WsMessage::Pong(payload)).await.is_err() {
                            return SessionEnd::TransportLost;
                        }
                    }
                    Some(Ok(WsMessage::Pong(_))) => {
                        debug!("Heartbeat pong received");
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        info!("Server closed the connection");
                        return SessionEnd::TransportLost;
                    }
                    Some(Ok(_)) => {
                        debug!("Ignoring non-text frame");
                    }
                    Some(Err(e)) => {
                        warn!("Transport error: {}", e);
                        return SessionEnd::TransportLost;
                    }
                    None => {
                        info!("Transport stream ended");
                        return SessionEnd::TransportLost;
                    }
                },
                command = self.command_rx.recv() => match command {
                    Some(command) => {
                        debug!("Sending command: {:?}", command);
                        let wire = command.to_wire().to_string();
                        if ws.send(WsMessage::Text(wire)).await.is_err() {
                            warn!("Failed to send command; transport lost");
                            return SessionEnd::TransportLost;
                        }
                    }
                    None => {
                        info!("Command channel closed; shutting down connection");
                        let _ = ws.close(None).await;
                        return SessionEnd::EngineClosed;
                    }
                },
                _ = heartbeat.tick() => {
                    let wire = Command::Ping.to_wire().to_string();
                    if ws.send(WsMessage::Text(wire)).await.is_err() {
                        warn!("Heartbeat failed; transport lost");
                        return SessionEnd::TransportLost;
                    }
                }
            }
        }
    }

    /// Parse and validate one inbound text frame, forwarding it to the
    /// engine. Returns false only when the engine channel is closed.
    async fn forward_text(&self, text: &str) -> bool {
        let raw: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!("Dropping unparseable frame: {}", e);
                return true;
            }
        };
        match validator::validate_or_log(&raw) {
            Some(frame) => self.engine_tx.send(EngineEvent::Frame(frame)).await.is_ok(),
            None => true,
        }
    }
}

enum SessionEnd {
    TransportLost,
    EngineClosed,
}

/// Exponential backoff with jitter for in-cycle connect retries.
fn attempt_backoff(attempt: u32) -> Duration {
    let base = 500u64 * 2u64.pow(attempt);
    let jitter = rand::random::<u64>() % 500;
    Duration::from_millis(base + jitter)
}

/// Capped backoff between reconnect cycles.
fn reconnect_backoff(cycle: u32) -> Duration {
    let base = Duration::from_millis(500u64.saturating_mul(2u64.saturating_pow(cycle.min(8))));
    let jitter = Duration::from_millis(rand::random::<u64>() % 500);
    (base + jitter).min(RECONNECT_BACKOFF_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_serialize_with_type_and_id() {
        let wire = Command::RequestInitialState {
            date: "2026-08-30".to_string(),
        }
        .to_wire();
        assert_eq!(wire["type"], "request_initial_state");
        assert_eq!(wire["data"]["date"], "2026-08-30");
        assert!(wire["id"].as_str().is_some());

        let ping = Command::Ping.to_wire();
        assert_eq!(ping["type"], "ping");
        assert!(ping.get("data").is_none());
    }

    #[test]
    fn reconnect_backoff_is_capped() {
        for cycle in 0..64 {
            assert!(reconnect_backoff(cycle) <= RECONNECT_BACKOFF_CAP);
        }
    }
}
