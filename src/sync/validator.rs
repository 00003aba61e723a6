// Inbound frame validation for remindersync.
// Every raw frame from the transport passes through here before it can touch
// engine state; downstream code never sees an unvalidated payload.

use log::warn;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;

use crate::models::MessageStatus;

/// Frame `type` strings the engine understands. Anything else is rejected.
pub mod frame_types {
    pub const QR_UPDATE: &str = "qr_update";
    pub const CLIENT_READY: &str = "client_ready";
    pub const MESSAGE_STATUS: &str = "message_status";
    pub const BATCH_STATUS: &str = "batch_status";
    pub const APPOINTMENT_UPDATE: &str = "appointment_update";
    pub const SENDING_FINISHED: &str = "sending_finished";
    pub const INITIAL_STATE_RESPONSE: &str = "initial_state_response";
    pub const ERROR: &str = "error";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const ACK: &str = "ack";
}

static KNOWN_TYPES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    use frame_types::*;
    HashSet::from([
        QR_UPDATE,
        CLIENT_READY,
        MESSAGE_STATUS,
        BATCH_STATUS,
        APPOINTMENT_UPDATE,
        SENDING_FINISHED,
        INITIAL_STATE_RESPONSE,
        ERROR,
        PING,
        PONG,
        HEARTBEAT,
        ACK,
    ])
});

/// Closed deny-list of reserved meta-keys. Frames carrying any of these are
/// dropped outright regardless of type.
const RESERVED_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// Frame types that carry no `data` payload.
const CONTROL_TYPES: [&str; 5] = [
    frame_types::SENDING_FINISHED,
    frame_types::PING,
    frame_types::PONG,
    frame_types::HEARTBEAT,
    frame_types::ACK,
];

/// Why a frame was rejected. Rejected frames are logged and dropped; they
/// never reach the merge engine.
#[derive(Debug, Error)]
pub enum RejectReason {
    #[error("frame is not an object")]
    NotAnObject,
    #[error("frame carries reserved key '{0}'")]
    ReservedKey(String),
    #[error("frame type is missing or empty")]
    MissingType,
    #[error("unknown frame type '{0}'")]
    UnknownType(String),
    #[error("frame type '{0}' requires an object data payload")]
    MissingData(String),
    #[error("timestamp must be a positive number")]
    BadTimestamp,
    #[error("failed to decode '{kind}' payload: {source}")]
    BadPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Sub-state carried by `client_ready` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientReadyState {
    Restarting,
    Initializing,
    Ready,
    NotReady,
}

/// `message_status` payload: one status transition, optionally carrying
/// embedded roster data for a not-yet-known message.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusFrame {
    pub message_id: String,
    pub status: MessageStatus,
    #[serde(default)]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub recipient_address: Option<String>,
    #[serde(default)]
    pub appointment_id: Option<String>,
}

/// One entry of a full-state snapshot.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    pub message_id: String,
    pub recipient_name: String,
    pub recipient_address: String,
    #[serde(default)]
    pub appointment_id: Option<String>,
    pub status: MessageStatus,
}

#[derive(Debug, Clone, Deserialize)]
struct QrPayload {
    qr: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ClientReadyPayload {
    state: ClientReadyState,
}

#[derive(Debug, Clone, Deserialize)]
struct BatchPayload {
    updates: Vec<StatusFrame>,
}

#[derive(Debug, Clone, Deserialize)]
struct SnapshotPayload {
    messages: Vec<SnapshotEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: Option<String>,
}

/// A validated, typed inbound frame.
#[derive(Debug, Clone)]
pub enum Frame {
    QrUpdate {
        qr: String,
        timestamp: Option<i64>,
    },
    ClientReady {
        state: ClientReadyState,
    },
    MessageStatus {
        update: StatusFrame,
        timestamp: Option<i64>,
    },
    BatchStatus {
        updates: Vec<StatusFrame>,
        timestamp: Option<i64>,
    },
    AppointmentUpdate(Value),
    SendingFinished,
    InitialState {
        messages: Vec<SnapshotEntry>,
    },
    ProviderError {
        message: Option<String>,
    },
    Ping,
    Pong,
    Heartbeat,
    Ack,
}

fn decode<T: serde::de::DeserializeOwned>(kind: &str, data: &Value) -> Result<T, RejectReason> {
    serde_json::from_value(data.clone()).map_err(|source| RejectReason::BadPayload {
        kind: kind.to_string(),
        source,
    })
}

/// Scan the whole frame for reserved meta-keys, including objects nested
/// inside arrays. Batch entries and snapshot messages carry untrusted data
/// too, so the deny-list applies at every depth.
fn find_reserved_key(value: &Value) -> Option<&'static str> {
    match value {
        Value::Object(map) => RESERVED_KEYS
            .into_iter()
            .find(|key| map.contains_key(*key))
            .or_else(|| map.values().find_map(find_reserved_key)),
        Value::Array(items) => items.iter().find_map(find_reserved_key),
        _ => None,
    }
}

/// Validate a raw inbound frame and lift it into a typed [`Frame`].
///
/// All five boundary rules must pass: object shape, reserved-key deny-list,
/// type whitelist, data payload presence for non-control types, and a
/// positive `timestamp` when one is present.
pub fn validate(raw: &Value) -> Result<Frame, RejectReason> {
    let obj = raw.as_object().ok_or(RejectReason::NotAnObject)?;

    if let Some(key) = find_reserved_key(raw) {
        return Err(RejectReason::ReservedKey(key.to_string()));
    }

    let kind = match obj.get("type").and_then(Value::as_str) {
        Some(s) if !s.is_empty() => s,
        _ => return Err(RejectReason::MissingType),
    };
    if !KNOWN_TYPES.contains(kind) {
        return Err(RejectReason::UnknownType(kind.to_string()));
    }

    let timestamp = match obj.get("timestamp") {
        None => None,
        Some(ts) => match ts.as_f64() {
            Some(v) if v > 0.0 => Some(v as i64),
            _ => return Err(RejectReason::BadTimestamp),
        },
    };

    let data = obj.get("data");
    if !CONTROL_TYPES.contains(&kind) && data.map(Value::is_object) != Some(true) {
        return Err(RejectReason::MissingData(kind.to_string()));
    }

    let frame = match kind {
        frame_types::QR_UPDATE => {
            let payload: QrPayload = decode(kind, data.unwrap())?;
            Frame::QrUpdate {
                qr: payload.qr,
                timestamp,
            }
        }
        frame_types::CLIENT_READY => {
            let payload: ClientReadyPayload = decode(kind, data.unwrap())?;
            Frame::ClientReady {
                state: payload.state,
            }
        }
        frame_types::MESSAGE_STATUS => {
            let update: StatusFrame = decode(kind, data.unwrap())?;
            Frame::MessageStatus { update, timestamp }
        }
        frame_types::BATCH_STATUS => {
            let payload: BatchPayload = decode(kind, data.unwrap())?;
            Frame::BatchStatus {
                updates: payload.updates,
                timestamp,
            }
        }
        frame_types::APPOINTMENT_UPDATE => Frame::AppointmentUpdate(data.unwrap().clone()),
        frame_types::SENDING_FINISHED => Frame::SendingFinished,
        frame_types::INITIAL_STATE_RESPONSE => {
            let payload: SnapshotPayload = decode(kind, data.unwrap())?;
            Frame::InitialState {
                messages: payload.messages,
            }
        }
        frame_types::ERROR => {
            let payload: ErrorPayload = decode(kind, data.unwrap())?;
            Frame::ProviderError {
                message: payload.message,
            }
        }
        frame_types::PING => Frame::Ping,
        frame_types::PONG => Frame::Pong,
        frame_types::HEARTBEAT => Frame::Heartbeat,
        frame_types::ACK => Frame::Ack,
        // Unreachable: kind was checked against KNOWN_TYPES above.
        other => return Err(RejectReason::UnknownType(other.to_string())),
    };

    Ok(frame)
}

/// Validate a frame, logging and swallowing rejections.
pub fn validate_or_log(raw: &Value) -> Option<Frame> {
    match validate(raw) {
        Ok(frame) => Some(frame),
        Err(reason) => {
            warn!("Dropping invalid frame: {}", reason);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_well_formed_status_frame() {
        let raw = json!({
            "type": "message_status",
            "timestamp": 1700000000000i64,
            "data": { "messageId": "m1", "status": 1 }
        });
        let frame = validate(&raw).expect("frame should validate");
        match frame {
            Frame::MessageStatus { update, timestamp } => {
                assert_eq!(update.message_id, "m1");
                assert_eq!(update.status, MessageStatus::Sent);
                assert_eq!(timestamp, Some(1700000000000));
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn rejects_non_object_frames() {
        assert!(matches!(
            validate(&json!("ping")),
            Err(RejectReason::NotAnObject)
        ));
        assert!(matches!(
            validate(&json!([1, 2, 3])),
            Err(RejectReason::NotAnObject)
        ));
    }

    #[test]
    fn rejects_reserved_keys() {
        let raw = json!({
            "type": "message_status",
            "__proto__": { "polluted": true },
            "data": { "messageId": "m1", "status": 1 }
        });
        assert!(matches!(
            validate(&raw),
            Err(RejectReason::ReservedKey(k)) if k == "__proto__"
        ));

        let nested = json!({
            "type": "message_status",
            "data": { "messageId": "m1", "status": 1, "constructor": {} }
        });
        assert!(matches!(
            validate(&nested),
            Err(RejectReason::ReservedKey(k)) if k == "constructor"
        ));
    }

    #[test]
    fn rejects_reserved_keys_at_any_depth() {
        let in_batch_entry = json!({
            "type": "batch_status",
            "data": {
                "updates": [
                    { "messageId": "m1", "status": 1, "__proto__": { "polluted": true } }
                ]
            }
        });
        assert!(matches!(
            validate(&in_batch_entry),
            Err(RejectReason::ReservedKey(k)) if k == "__proto__"
        ));

        let in_snapshot_message = json!({
            "type": "initial_state_response",
            "data": {
                "messages": [
                    {
                        "messageId": "m1",
                        "recipientName": "Ana",
                        "recipientAddress": "555",
                        "status": 1,
                        "extra": { "prototype": {} }
                    }
                ]
            }
        });
        assert!(matches!(
            validate(&in_snapshot_message),
            Err(RejectReason::ReservedKey(k)) if k == "prototype"
        ));
    }

    #[test]
    fn rejects_proto_as_type_string() {
        let raw = json!({ "type": "__proto__", "data": {} });
        assert!(matches!(validate(&raw), Err(RejectReason::UnknownType(_))));
    }

    #[test]
    fn rejects_unknown_and_missing_types() {
        assert!(matches!(
            validate(&json!({ "type": "shutdown_everything", "data": {} })),
            Err(RejectReason::UnknownType(_))
        ));
        assert!(matches!(
            validate(&json!({ "data": {} })),
            Err(RejectReason::MissingType)
        ));
        assert!(matches!(
            validate(&json!({ "type": "", "data": {} })),
            Err(RejectReason::MissingType)
        ));
    }

    #[test]
    fn rejects_missing_data_for_non_control_types() {
        assert!(matches!(
            validate(&json!({ "type": "message_status" })),
            Err(RejectReason::MissingData(_))
        ));
        assert!(matches!(
            validate(&json!({ "type": "message_status", "data": [1, 2] })),
            Err(RejectReason::MissingData(_))
        ));
        // Control frames need no data.
        assert!(validate(&json!({ "type": "ping" })).is_ok());
        assert!(validate(&json!({ "type": "sending_finished" })).is_ok());
    }

    #[test]
    fn rejects_bad_timestamps() {
        let zero = json!({ "type": "ping", "timestamp": 0 });
        assert!(matches!(validate(&zero), Err(RejectReason::BadTimestamp)));
        let negative = json!({ "type": "ping", "timestamp": -5 });
        assert!(matches!(
            validate(&negative),
            Err(RejectReason::BadTimestamp)
        ));
        let stringy = json!({ "type": "ping", "timestamp": "soon" });
        assert!(matches!(validate(&stringy), Err(RejectReason::BadTimestamp)));
    }

    #[test]
    fn rejects_undecodable_payloads() {
        let raw = json!({
            "type": "message_status",
            "data": { "messageId": "m1", "status": 99 }
        });
        assert!(matches!(validate(&raw), Err(RejectReason::BadPayload { .. })));
    }

    #[test]
    fn decodes_client_ready_substates() {
        for (wire, expected) in [
            ("restarting", ClientReadyState::Restarting),
            ("initializing", ClientReadyState::Initializing),
            ("ready", ClientReadyState::Ready),
            ("not-ready", ClientReadyState::NotReady),
        ] {
            let raw = json!({ "type": "client_ready", "data": { "state": wire } });
            match validate(&raw).expect("client_ready should validate") {
                Frame::ClientReady { state } => assert_eq!(state, expected),
                other => panic!("unexpected frame: {:?}", other),
            }
        }
    }
}
