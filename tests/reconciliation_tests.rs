// Reconciliation tests: snapshot catch-up through the same merge path as
// live updates, in every arrival order, including superseded requests.

mod common;
use common::{build_engine, drain, frame_event, snapshot_frame, status_frame_with_roster};

use remindersync::models::MessageStatus;
use remindersync::sync::{Command, EngineEvent};

/// Connecting requests a snapshot for the campaign date.
#[tokio::test]
async fn connect_triggers_snapshot_request() {
    let (mut engine, _view_rx, mut command_rx) = build_engine("2026-08-30");

    engine.handle_event(EngineEvent::Connected).await;

    let commands = drain(&mut command_rx);
    assert_eq!(
        commands,
        vec![Command::RequestInitialState {
            date: "2026-08-30".to_string()
        }]
    );
}

/// Every reconnect reconciles again.
#[tokio::test]
async fn reconnect_triggers_snapshot_request_again() {
    let (mut engine, _view_rx, mut command_rx) = build_engine("2026-08-30");

    engine.handle_event(EngineEvent::Connected).await;
    engine.handle_event(EngineEvent::Disconnected).await;
    engine.handle_event(EngineEvent::Connected).await;

    let requests = drain(&mut command_rx)
        .into_iter()
        .filter(|c| matches!(c, Command::RequestInitialState { .. }))
        .count();
    assert_eq!(requests, 2);
}

/// Scenario: a live frame moves m1 to Read while the snapshot (showing the
/// older Delivered) is in flight. Final state is Read in both arrival
/// orders.
#[tokio::test]
async fn snapshot_cannot_regress_live_updates() {
    // Live update first, snapshot second.
    let (mut engine, _view_rx, _command_rx) = build_engine("2026-08-30");
    engine.handle_event(EngineEvent::Connected).await;
    engine
        .handle_event(frame_event(status_frame_with_roster("m1", 3, "A", "555")))
        .await;
    engine
        .handle_event(frame_event(snapshot_frame(&[("m1", "A", "555", 2)])))
        .await;
    assert_eq!(engine.roster().get("m1").unwrap().status, MessageStatus::Read);

    // Snapshot first, live update second.
    let (mut engine, _view_rx, _command_rx) = build_engine("2026-08-30");
    engine.handle_event(EngineEvent::Connected).await;
    engine
        .handle_event(frame_event(snapshot_frame(&[("m1", "A", "555", 2)])))
        .await;
    engine
        .handle_event(frame_event(status_frame_with_roster("m1", 3, "A", "555")))
        .await;
    assert_eq!(engine.roster().get("m1").unwrap().status, MessageStatus::Read);
}

/// Two requests go out on the same connection (connect, then an explicit
/// resync) before either response lands. The slow response to the first
/// request is ignored; the response to the newest request applies.
#[tokio::test]
async fn superseded_snapshot_is_ignored() {
    let (mut engine, _view_rx, _command_rx) = build_engine("2026-08-30");

    engine.handle_event(EngineEvent::Connected).await;
    engine.handle_event(EngineEvent::Resync).await;

    // The slow response to the first request shows stale data.
    engine
        .handle_event(frame_event(snapshot_frame(&[("m1", "A", "555", 0)])))
        .await;
    assert!(engine.roster().get("m1").is_none());

    // The response to the resync applies normally.
    engine
        .handle_event(frame_event(snapshot_frame(&[("m1", "A", "555", 2)])))
        .await;
    assert_eq!(
        engine.roster().get("m1").unwrap().status,
        MessageStatus::Delivered
    );
}

/// A request in flight when the transport drops can never be answered; the
/// snapshot answering the post-reconnect request must not be mistaken for
/// its response.
#[tokio::test]
async fn snapshot_after_reconnect_applies() {
    let (mut engine, _view_rx, _command_rx) = build_engine("2026-08-30");

    engine.handle_event(EngineEvent::Connected).await;
    // The socket dies before the snapshot arrives.
    engine.handle_event(EngineEvent::Disconnected).await;
    engine.handle_event(EngineEvent::Connected).await;

    engine
        .handle_event(frame_event(snapshot_frame(&[("m1", "A", "555", 2)])))
        .await;
    assert_eq!(
        engine.roster().get("m1").unwrap().status,
        MessageStatus::Delivered
    );
}

/// Re-merging the same snapshot is a no-op on the roster.
#[tokio::test]
async fn snapshot_merge_is_idempotent() {
    let (mut engine, _view_rx, _command_rx) = build_engine("2026-08-30");

    let snapshot = snapshot_frame(&[("m1", "A", "555", 1), ("m2", "B", "556", 2)]);
    engine.handle_event(frame_event(snapshot.clone())).await;
    let first_m1 = engine.roster().get("m1").unwrap().clone();

    engine.handle_event(frame_event(snapshot)).await;
    assert_eq!(engine.roster().len(), 2);
    assert_eq!(engine.roster().get("m1").unwrap().status, first_m1.status);
    assert_eq!(
        engine.roster().get("m1").unwrap().added_at,
        first_m1.added_at
    );
}

/// A snapshot populates messages the live stream never mentioned, and live
/// progress made before the snapshot survives it.
#[tokio::test]
async fn snapshot_converges_with_live_history() {
    let (mut engine, _view_rx, _command_rx) = build_engine("2026-08-30");
    engine.handle_event(EngineEvent::Connected).await;

    engine
        .handle_event(frame_event(status_frame_with_roster("m1", 1, "A", "555")))
        .await;
    engine
        .handle_event(frame_event(status_frame_with_roster("m1", 3, "A", "555")))
        .await;

    engine
        .handle_event(frame_event(snapshot_frame(&[
            ("m1", "A", "555", 2),
            ("m2", "B", "556", 1),
            ("m3", "C", "557", -1),
        ])))
        .await;

    assert_eq!(engine.roster().get("m1").unwrap().status, MessageStatus::Read);
    assert_eq!(engine.roster().get("m2").unwrap().status, MessageStatus::Sent);
    assert_eq!(engine.roster().get("m3").unwrap().status, MessageStatus::Error);
    assert_eq!(engine.summary().total(), 3);
}
