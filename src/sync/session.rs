// Session lifecycle state machine for the provider session backing a
// campaign. Owns the coarse campaign phase; every other component only
// reads it.

use log::{info, warn};
use serde::Serialize;

use crate::sync::validator::ClientReadyState;

/// Lifecycle-event observations allowed in Authenticating before the
/// operator is offered a retry instead of waiting forever.
pub const MAX_AUTH_OBSERVATIONS: u32 = 12;

/// Coarse campaign phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Init,
    Authenticating,
    Ready,
    Sending,
    Finished,
}

/// Tracks the campaign phase and governs which operator actions are legal.
#[derive(Debug)]
pub struct SessionLifecycle {
    phase: SessionPhase,
    auth_observations: u32,
    retry_available: bool,
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        SessionLifecycle {
            phase: SessionPhase::Init,
            auth_observations: 0,
            retry_available: false,
        }
    }
}

impl SessionLifecycle {
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn retry_available(&self) -> bool {
        self.retry_available
    }

    /// Transport established. Fresh sessions move into Authenticating; a
    /// session that already authenticated keeps its phase across reconnects.
    pub fn on_connected(&mut self) -> Option<SessionPhase> {
        if self.phase == SessionPhase::Init {
            self.transition(SessionPhase::Authenticating)
        } else {
            None
        }
    }

    /// Authoritative client-state signal from the provider.
    pub fn on_client_ready(&mut self, state: ClientReadyState) -> Option<SessionPhase> {
        match state {
            ClientReadyState::Ready => {
                self.auth_observations = 0;
                self.retry_available = false;
                if matches!(self.phase, SessionPhase::Init | SessionPhase::Authenticating) {
                    self.transition(SessionPhase::Ready)
                } else {
                    // Repeated ready signals while already past auth are no-ops.
                    None
                }
            }
            ClientReadyState::Restarting => self.transition(SessionPhase::Authenticating),
            ClientReadyState::Initializing | ClientReadyState::NotReady => {
                self.observe_auth_progress();
                None
            }
        }
    }

    /// An auth-phase lifecycle observation that did not complete auth
    /// (a QR refresh, an initializing ping, a not-ready report).
    pub fn observe_auth_progress(&mut self) {
        if self.phase != SessionPhase::Authenticating {
            return;
        }
        self.auth_observations += 1;
        if self.auth_observations >= MAX_AUTH_OBSERVATIONS && !self.retry_available {
            warn!(
                "Authentication not confirmed after {} lifecycle events; offering retry",
                self.auth_observations
            );
            self.retry_available = true;
        }
    }

    /// Operator starts the send campaign. Legal only from Ready.
    pub fn start_sending(&mut self) -> Option<SessionPhase> {
        if self.phase == SessionPhase::Ready {
            self.transition(SessionPhase::Sending)
        } else {
            warn!(
                "Ignoring start-sending request in phase {:?}",
                self.phase
            );
            None
        }
    }

    /// Authoritative "all dispatched" signal.
    pub fn on_sending_finished(&mut self) -> Option<SessionPhase> {
        if self.phase == SessionPhase::Sending {
            self.transition(SessionPhase::Finished)
        } else {
            warn!(
                "sending_finished received in phase {:?}; phase unchanged",
                self.phase
            );
            None
        }
    }

    /// Restart keeps stored credentials and campaign data; the session goes
    /// back through authentication.
    pub fn restart(&mut self) -> Option<SessionPhase> {
        self.auth_observations = 0;
        self.retry_available = false;
        self.transition(SessionPhase::Authenticating)
    }

    /// Logout clears everything and returns to Init.
    pub fn logout(&mut self) -> Option<SessionPhase> {
        self.auth_observations = 0;
        self.retry_available = false;
        self.transition(SessionPhase::Init)
    }

    fn transition(&mut self, next: SessionPhase) -> Option<SessionPhase> {
        if self.phase == next {
            return None;
        }
        info!("Session phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
        Some(next)
    }
}
