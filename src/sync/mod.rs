// Delivery-status synchronization engine for remindersync.
// This module owns the single serialized dispatch path: every inbound frame
// and operator action becomes an EngineEvent on one channel, and only the
// task draining that channel ever mutates roster, ledger, or session state.

use log::{debug, error, info};
use serde_json::Value;
use tokio::sync::mpsc;

pub mod connection;
pub mod merge;
pub mod reconcile;
pub mod roster;
pub mod session;
pub mod validator;

pub use connection::{Command, ConnectionManager};
pub use merge::{MergeOutcome, StatusMerge};
pub use reconcile::ReconcileController;
pub use roster::{RosterFragment, RosterProjection};
pub use session::{SessionLifecycle, SessionPhase};
pub use validator::{ClientReadyState, Frame, RejectReason, SnapshotEntry, StatusFrame};

use crate::models::{now_millis, CampaignSummary, Message, StatusUpdate};

/// Capacity of the engine's serialized event channel.
pub const EVENT_QUEUE_DEPTH: usize = 256;

/// Everything that can reach the engine: validated frames from the
/// transport, transport lifecycle notices, and operator actions.
#[derive(Debug)]
pub enum EngineEvent {
    Frame(Frame),
    Connected,
    Disconnected,
    Resync,
    StartSending,
    ResetCampaign,
    Restart,
    Destroy,
    Logout,
}

/// Read-only updates published to the view layer.
#[derive(Debug, Clone)]
pub enum ViewEvent {
    MessageUpdated(Message),
    Summary(CampaignSummary),
    PhaseChanged(SessionPhase),
    QrCode(String),
    Appointment(Value),
    ProviderError(String),
    AuthRetryAvailable,
}

/// The synchronization engine: one instance per campaign session, owning the
/// roster, the dedup ledger, the session machine, and reconciliation
/// bookkeeping. Constructed explicitly and torn down with the session; never
/// a module-level singleton.
pub struct SyncEngine {
    campaign_date: String,
    roster: RosterProjection,
    merge: StatusMerge,
    session: SessionLifecycle,
    reconcile: ReconcileController,
    command_tx: mpsc::Sender<Command>,
    view_tx: mpsc::Sender<ViewEvent>,
    retry_announced: bool,
}

impl SyncEngine {
    pub fn new(
        campaign_date: impl Into<String>,
        command_tx: mpsc::Sender<Command>,
    ) -> (Self, mpsc::Receiver<ViewEvent>) {
        let (view_tx, view_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        (
            SyncEngine {
                campaign_date: campaign_date.into(),
                roster: RosterProjection::default(),
                merge: StatusMerge::default(),
                session: SessionLifecycle::default(),
                reconcile: ReconcileController::default(),
                command_tx,
                view_tx,
                retry_announced: false,
            },
            view_rx,
        )
    }

    pub fn phase(&self) -> SessionPhase {
        self.session.phase()
    }

    pub fn roster(&self) -> &RosterProjection {
        &self.roster
    }

    pub fn summary(&self) -> CampaignSummary {
        self.roster.summary()
    }

    /// Drain the serialized event channel until all senders hang up.
    pub async fn run(mut self, mut events: mpsc::Receiver<EngineEvent>) {
        info!(
            "Sync engine running for campaign date {}",
            self.campaign_date
        );
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        info!("Sync engine stopped: event channel closed");
    }

    /// Dispatch one event. All state mutation happens here, one event at a
    /// time, in arrival order.
    pub async fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Frame(frame) => self.handle_frame(frame).await,
            EngineEvent::Connected => {
                if let Some(phase) = self.session.on_connected() {
                    self.publish(ViewEvent::PhaseChanged(phase)).await;
                }
                self.request_snapshot().await;
            }
            EngineEvent::Disconnected => {
                info!("Transport dropped; reconciliation will rerun on reconnect");
                // Requests in flight died with the socket; a response will
                // never arrive for them, so they must not be counted against
                // the snapshot sent after the next reconnect.
                self.reconcile.abandon_in_flight();
            }
            EngineEvent::Resync => self.request_snapshot().await,
            EngineEvent::StartSending => {
                if let Some(phase) = self.session.start_sending() {
                    self.publish(ViewEvent::PhaseChanged(phase)).await;
                }
            }
            EngineEvent::ResetCampaign => {
                info!("Campaign reset: clearing roster, ledger, and session state");
                self.reset_local_state().await;
            }
            EngineEvent::Restart => {
                // Bare restart keeps roster and ledger; only the session
                // goes back through authentication.
                self.send_command(Command::Restart).await;
                if let Some(phase) = self.session.restart() {
                    self.publish(ViewEvent::PhaseChanged(phase)).await;
                }
            }
            EngineEvent::Destroy => {
                self.send_command(Command::Destroy).await;
                self.reset_local_state().await;
            }
            EngineEvent::Logout => {
                self.send_command(Command::Logout).await;
                self.reset_local_state().await;
            }
        }
    }

    async fn handle_frame(&mut self, frame: Frame) {
        match frame {
            Frame::QrUpdate { qr, .. } => {
                self.session.observe_auth_progress();
                self.publish(ViewEvent::QrCode(qr)).await;
                self.announce_retry_if_needed().await;
            }
            Frame::ClientReady { state } => {
                if let Some(phase) = self.session.on_client_ready(state) {
                    self.publish(ViewEvent::PhaseChanged(phase)).await;
                }
                self.announce_retry_if_needed().await;
            }
            Frame::MessageStatus { update, timestamp } => {
                let observed_at = timestamp.unwrap_or_else(now_millis);
                self.apply_status(update, observed_at).await;
            }
            Frame::BatchStatus { updates, timestamp } => {
                let observed_at = timestamp.unwrap_or_else(now_millis);
                for update in updates {
                    self.apply_status(update, observed_at).await;
                }
            }
            Frame::AppointmentUpdate(payload) => {
                // Opaque passthrough; the appointment domain lives elsewhere.
                self.publish(ViewEvent::Appointment(payload)).await;
            }
            Frame::SendingFinished => {
                if let Some(phase) = self.session.on_sending_finished() {
                    self.publish(ViewEvent::PhaseChanged(phase)).await;
                }
            }
            Frame::InitialState { messages } => self.apply_snapshot(messages).await,
            Frame::ProviderError { message } => {
                let message = message.unwrap_or_else(|| "unspecified provider error".to_string());
                error!("Provider reported error: {}", message);
                self.publish(ViewEvent::ProviderError(message)).await;
            }
            Frame::Ping | Frame::Pong | Frame::Heartbeat | Frame::Ack => {
                debug!("Control frame absorbed");
            }
        }
    }

    /// Apply one live status update. A single-send frame that carries
    /// embedded roster data for an unknown id creates the roster entry
    /// first; without roster data an unknown id is a recoverable anomaly
    /// handled inside the merge engine.
    async fn apply_status(&mut self, frame: StatusFrame, observed_at: i64) {
        if !self.roster.contains(&frame.message_id)
            && (frame.recipient_name.is_some() || frame.recipient_address.is_some())
        {
            self.roster.merge(
                vec![RosterFragment {
                    message_id: frame.message_id.clone(),
                    recipient_name: frame.recipient_name.clone(),
                    recipient_address: frame.recipient_address.clone(),
                    appointment_id: frame.appointment_id.clone(),
                    status: None,
                }],
                observed_at,
            );
        }

        let update = StatusUpdate {
            message_id: frame.message_id.clone(),
            status: frame.status,
            observed_at,
        };
        if let MergeOutcome::Applied(_) = self.merge.apply(&mut self.roster, update) {
            if let Some(message) = self.roster.get(&frame.message_id) {
                self.publish(ViewEvent::MessageUpdated(message.clone())).await;
            }
        }
    }

    /// Merge a full-state snapshot: roster first, then every status through
    /// the merge engine exactly as if each were a live update, so sticky
    /// errors and the dedup ledger apply uniformly to catch-up data.
    async fn apply_snapshot(&mut self, entries: Vec<SnapshotEntry>) {
        if !self.reconcile.accept() {
            return;
        }
        let now = now_millis();
        info!("Merging snapshot with {} messages", entries.len());

        let fragments = entries
            .iter()
            .map(|e| RosterFragment {
                message_id: e.message_id.clone(),
                recipient_name: Some(e.recipient_name.clone()),
                recipient_address: Some(e.recipient_address.clone()),
                appointment_id: e.appointment_id.clone(),
                status: Some(e.status),
            })
            .collect();
        let mut touched = self.roster.merge(fragments, now);

        for entry in entries {
            let update = StatusUpdate {
                message_id: entry.message_id.clone(),
                status: entry.status,
                observed_at: now,
            };
            if let MergeOutcome::Applied(_) = self.merge.apply(&mut self.roster, update) {
                if !touched.contains(&entry.message_id) {
                    touched.push(entry.message_id);
                }
            }
        }

        for id in touched {
            if let Some(message) = self.roster.get(&id) {
                self.publish(ViewEvent::MessageUpdated(message.clone())).await;
            }
        }
        self.merge.sweep_ledger(now);
        let summary = self.roster.summary();
        self.publish(ViewEvent::Summary(summary)).await;
    }

    async fn request_snapshot(&mut self) {
        self.reconcile.begin();
        self.send_command(Command::RequestInitialState {
            date: self.campaign_date.clone(),
        })
        .await;
    }

    async fn reset_local_state(&mut self) {
        self.roster.clear();
        self.merge.reset();
        self.reconcile.reset();
        self.retry_announced = false;
        if let Some(phase) = self.session.logout() {
            self.publish(ViewEvent::PhaseChanged(phase)).await;
        }
        let summary = self.roster.summary();
        self.publish(ViewEvent::Summary(summary)).await;
    }

    async fn announce_retry_if_needed(&mut self) {
        if self.session.retry_available() && !self.retry_announced {
            self.retry_announced = true;
            self.publish(ViewEvent::AuthRetryAvailable).await;
        } else if !self.session.retry_available() {
            self.retry_announced = false;
        }
    }

    async fn send_command(&self, command: Command) {
        if let Err(e) = self.command_tx.send(command).await {
            error!("Failed to queue outbound command: {}", e);
        }
    }

    async fn publish(&self, event: ViewEvent) {
        if self.view_tx.send(event).await.is_err() {
            debug!("View layer gone; dropping update");
        }
    }
}
