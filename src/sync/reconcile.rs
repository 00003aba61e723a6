// Reconciliation bookkeeping: decides whether an arriving snapshot response
// still corresponds to the most recent catch-up request, so a slow response
// from a superseded request never overwrites fresher state.

use log::{debug, warn};
use std::collections::VecDeque;

/// Tracks outstanding snapshot requests by generation. The engine calls
/// [`begin`](ReconcileController::begin) for every trigger (first connect,
/// reconnect, explicit resync) and [`accept`](ReconcileController::accept)
/// when a snapshot response arrives.
#[derive(Debug, Default)]
pub struct ReconcileController {
    latest: u64,
    outstanding: VecDeque<u64>,
}

impl ReconcileController {
    /// Record a new reconciliation trigger. Returns the generation of the
    /// request about to be sent; any earlier outstanding request is now
    /// superseded.
    pub fn begin(&mut self) -> u64 {
        self.latest += 1;
        self.outstanding.push_back(self.latest);
        debug!("Reconciliation requested (generation {})", self.latest);
        self.latest
    }

    /// A snapshot response arrived. Responses come back in request order, so
    /// the oldest outstanding request is the one being answered; it is
    /// accepted only if no newer trigger has superseded it. An unsolicited
    /// snapshot (no outstanding request) is authoritative catch-up data and
    /// is accepted.
    pub fn accept(&mut self) -> bool {
        match self.outstanding.pop_front() {
            Some(generation) if generation == self.latest => true,
            Some(generation) => {
                warn!(
                    "Ignoring stale snapshot for superseded request (generation {} < {})",
                    generation, self.latest
                );
                false
            }
            None => {
                debug!("Accepting unsolicited snapshot");
                true
            }
        }
    }

    /// The transport died. Requests sent on that connection can never be
    /// answered, so forget them; keeping them queued would misalign every
    /// response received after the reconnect.
    pub fn abandon_in_flight(&mut self) {
        if !self.outstanding.is_empty() {
            debug!(
                "Abandoning {} unanswerable snapshot request(s)",
                self.outstanding.len()
            );
            self.outstanding.clear();
        }
    }

    pub fn in_flight(&self) -> usize {
        self.outstanding.len()
    }

    pub fn reset(&mut self) {
        self.outstanding.clear();
    }
}
