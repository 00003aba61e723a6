// Status merge engine: the one place a Message's status may change.
// Applies a StatusUpdate deterministically regardless of delivery order or
// duplication, with a single documented exception for sticky errors.

use log::{debug, info, warn};
use std::collections::HashMap;

use crate::models::{MessageStatus, StatusUpdate};
use crate::sync::roster::RosterProjection;

/// How long a ledger entry keeps suppressing retransmissions, in millis.
pub const LEDGER_WINDOW_MS: i64 = 5 * 60 * 1000;

#[derive(Debug, Clone, Copy)]
struct LedgerEntry {
    status: MessageStatus,
    observed_at: i64,
}

/// Bounded-window record of the last admitted status per message. Suppresses
/// duplicate and stale retransmissions only; the per-message status rules in
/// [`StatusMerge::apply`] hold unconditionally with or without it.
#[derive(Debug, Default)]
pub struct StatusLedger {
    entries: HashMap<String, LedgerEntry>,
    window_ms: i64,
}

impl StatusLedger {
    pub fn new(window_ms: i64) -> Self {
        StatusLedger {
            entries: HashMap::new(),
            window_ms,
        }
    }

    /// True when an in-window entry at the same or a higher status already
    /// covers this update: the transport redelivered something we handled.
    /// A provider failure report is never shadowed by a non-error entry; a
    /// delivery failure must surface even when other updates for the same
    /// message landed moments before it.
    fn is_duplicate(&self, update: &StatusUpdate) -> bool {
        let entry = match self.entries.get(&update.message_id) {
            Some(entry) => entry,
            None => return false,
        };
        let in_window = update.observed_at - entry.observed_at < self.window_ms;
        let failure_report = update.status == MessageStatus::Error
            && entry.status != MessageStatus::Error;
        in_window && !failure_report && entry.status >= update.status
    }

    fn record(&mut self, update: &StatusUpdate) {
        self.entries.insert(
            update.message_id.clone(),
            LedgerEntry {
                status: update.status,
                observed_at: update.observed_at,
            },
        );
    }

    /// Drop entries older than the window relative to `now`.
    pub fn sweep(&mut self, now: i64) {
        let window = self.window_ms;
        self.entries.retain(|_, e| now - e.observed_at < window);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Result of feeding one update through the merge engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The message's status changed to the given value.
    Applied(MessageStatus),
    /// Suppressed by the dedup ledger as a duplicate or stale retransmission.
    Duplicate,
    /// No roster entry for this id; recoverable anomaly, dropped.
    UnknownMessage,
    /// A late "pending" echo must not erase a known failure.
    StickyError,
}

/// Monotonic-ish merge of status updates into the roster.
#[derive(Debug)]
pub struct StatusMerge {
    ledger: StatusLedger,
}

impl Default for StatusMerge {
    fn default() -> Self {
        StatusMerge {
            ledger: StatusLedger::new(LEDGER_WINDOW_MS),
        }
    }
}

impl StatusMerge {
    pub fn with_window(window_ms: i64) -> Self {
        StatusMerge {
            ledger: StatusLedger::new(window_ms),
        }
    }

    /// Apply one status update. Deterministic for any delivery order or
    /// duplication of the same set of updates.
    ///
    /// A failure is sticky against a late "pending" echo, but any other
    /// current status accepts whatever the provider reports next, even when
    /// that is numerically lower. The provider's vocabulary is not perfectly
    /// linear (it can reissue "sent" after "delivered" during retries) and
    /// the projection reflects its latest word rather than enforcing a local
    /// ordering the provider does not guarantee.
    pub fn apply(&mut self, roster: &mut RosterProjection, update: StatusUpdate) -> MergeOutcome {
        if self.ledger.is_duplicate(&update) {
            debug!(
                "Suppressing duplicate status {:?} for message {}",
                update.status, update.message_id
            );
            return MergeOutcome::Duplicate;
        }

        let message = match roster.get_mut(&update.message_id) {
            Some(m) => m,
            None => {
                // Dropped updates leave no ledger entry: the same update may
                // legitimately arrive again once the roster knows the id.
                warn!(
                    "Status update for unknown message {} ({:?}); roster not yet populated",
                    update.message_id, update.status
                );
                return MergeOutcome::UnknownMessage;
            }
        };
        self.ledger.record(&update);

        let current = message.status;
        if current == MessageStatus::Error && update.status == MessageStatus::Pending {
            info!(
                "Keeping sticky error on message {}; late pending echo dropped",
                update.message_id
            );
            return MergeOutcome::StickyError;
        }

        if update.status > current || current != MessageStatus::Error {
            message.status = update.status;
            message.last_updated = update.observed_at;
            debug!(
                "Message {} status {:?} -> {:?}",
                update.message_id, current, update.status
            );
            MergeOutcome::Applied(update.status)
        } else {
            // current == Error and incoming is Error again; nothing to do.
            MergeOutcome::Duplicate
        }
    }

    pub fn ledger(&self) -> &StatusLedger {
        &self.ledger
    }

    pub fn sweep_ledger(&mut self, now: i64) {
        self.ledger.sweep(now);
    }

    /// Forget everything; used by explicit campaign reset only.
    pub fn reset(&mut self) {
        self.ledger.clear();
    }
}
