// Shared helpers for the engine integration tests: logging setup, frame
// builders, and a harness that wires an engine to inspectable channels.
#![allow(dead_code)]

use serde_json::{json, Value};
use tokio::sync::mpsc;

use remindersync::models::now_millis;
use remindersync::sync::{validator, Command, EngineEvent, SyncEngine, ViewEvent};

pub fn setup_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// An engine plus the receiving ends of its view and command channels.
pub fn build_engine(date: &str) -> (SyncEngine, mpsc::Receiver<ViewEvent>, mpsc::Receiver<Command>) {
    setup_logging();
    let (command_tx, command_rx) = mpsc::channel(32);
    let (engine, view_rx) = SyncEngine::new(date, command_tx);
    (engine, view_rx, command_rx)
}

/// Validate a raw frame and wrap it as an engine event, panicking if the
/// frame is malformed: tests build their frames deliberately.
pub fn frame_event(raw: Value) -> EngineEvent {
    let frame = validator::validate(&raw).expect("test frame should validate");
    EngineEvent::Frame(frame)
}

/// A `message_status` frame with embedded roster data.
pub fn status_frame_with_roster(id: &str, status: i8, name: &str, address: &str) -> Value {
    json!({
        "type": "message_status",
        "timestamp": now_millis(),
        "data": {
            "messageId": id,
            "status": status,
            "recipientName": name,
            "recipientAddress": address,
        }
    })
}

/// A bare `message_status` frame.
pub fn status_frame(id: &str, status: i8) -> Value {
    json!({
        "type": "message_status",
        "timestamp": now_millis(),
        "data": { "messageId": id, "status": status }
    })
}

/// An `initial_state_response` frame for the given `(id, name, address,
/// status)` entries.
pub fn snapshot_frame(entries: &[(&str, &str, &str, i8)]) -> Value {
    let messages: Vec<Value> = entries
        .iter()
        .map(|(id, name, address, status)| {
            json!({
                "messageId": id,
                "recipientName": name,
                "recipientAddress": address,
                "status": status,
            })
        })
        .collect();
    json!({
        "type": "initial_state_response",
        "data": { "messages": messages }
    })
}

pub fn client_ready_frame(state: &str) -> Value {
    json!({ "type": "client_ready", "data": { "state": state } })
}

/// Collect everything currently buffered on a channel.
pub fn drain<T>(rx: &mut mpsc::Receiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(item) = rx.try_recv() {
        out.push(item);
    }
    out
}

/// Count the buffered `MessageUpdated` events for one message id.
pub fn count_updates_for(events: &[ViewEvent], id: &str) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ViewEvent::MessageUpdated(m) if m.message_id == id))
        .count()
}
