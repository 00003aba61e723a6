// Roster projection: the evolving set of known reminder messages for the
// current campaign, merged together from fragments that arrive piecemeal.

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::models::{CampaignSummary, Message, MessageStatus};

/// Digits with an optional leading `+`, the shape the provider accepts.
static ADDRESS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?[0-9]{3,15}$").unwrap());

/// Check a recipient address against the provider's accepted shape.
pub fn validate_address(address: &str) -> bool {
    ADDRESS_RE.is_match(address)
}

/// A partial roster record as it appears on the wire: a pre-send
/// announcement, an embedded roster payload, or one snapshot entry.
#[derive(Debug, Clone, Default)]
pub struct RosterFragment {
    pub message_id: String,
    pub recipient_name: Option<String>,
    pub recipient_address: Option<String>,
    pub appointment_id: Option<String>,
    pub status: Option<MessageStatus>,
}

/// Known messages keyed by id. Entries are never removed except by an
/// explicit campaign reset.
#[derive(Debug, Default)]
pub struct RosterProjection {
    messages: HashMap<String, Message>,
}

impl RosterProjection {
    /// Merge incoming fragments into the projection. Returns the ids of
    /// messages that were created or changed, in input order.
    ///
    /// Matching prefers `message_id`; when the id is unknown, an entry with
    /// the same `(recipient_name, recipient_address)` pair is treated as the
    /// same message seen earlier under a provisional id and re-keyed. Status
    /// reconciliation here is the loose roster-level `max`; live updates go
    /// through the merge engine instead.
    pub fn merge(&mut self, fragments: Vec<RosterFragment>, now: i64) -> Vec<String> {
        let mut touched = Vec::new();
        for fragment in fragments {
            if let Some(id) = self.merge_one(fragment, now) {
                touched.push(id);
            }
        }
        touched
    }

    fn merge_one(&mut self, fragment: RosterFragment, now: i64) -> Option<String> {
        if fragment.message_id.is_empty() {
            warn!("Dropping roster fragment without a message id");
            return None;
        }

        let existing_key = if self.messages.contains_key(&fragment.message_id) {
            Some(fragment.message_id.clone())
        } else {
            self.find_by_recipient(&fragment)
        };

        match existing_key {
            Some(key) => {
                let mut message = self.messages.remove(&key).expect("key was just matched");
                let mut changed = false;

                if message.message_id != fragment.message_id {
                    // Provisional identity reconciled to the server-assigned id.
                    debug!(
                        "Re-keying roster entry {} -> {}",
                        message.message_id, fragment.message_id
                    );
                    message.message_id = fragment.message_id.clone();
                    changed = true;
                }
                if message.appointment_id.is_none() && fragment.appointment_id.is_some() {
                    message.appointment_id = fragment.appointment_id;
                    changed = true;
                }
                if let Some(status) = fragment.status {
                    let merged = message.status.max(status);
                    if merged != message.status {
                        message.status = merged;
                        changed = true;
                    }
                }
                if changed {
                    message.last_updated = now;
                }

                let id = message.message_id.clone();
                self.messages.insert(id.clone(), message);
                changed.then_some(id)
            }
            None => {
                let address = fragment.recipient_address.unwrap_or_default();
                if !address.is_empty() && !validate_address(&address) {
                    warn!(
                        "Recipient address '{}' for message {} has an unexpected shape",
                        address, fragment.message_id
                    );
                }
                let message = Message {
                    message_id: fragment.message_id.clone(),
                    recipient_name: fragment.recipient_name.unwrap_or_default(),
                    recipient_address: address,
                    appointment_id: fragment.appointment_id,
                    status: fragment.status.unwrap_or(MessageStatus::Pending),
                    added_at: now,
                    last_updated: now,
                };
                debug!(
                    "Roster: new message {} for {}",
                    message.message_id, message.recipient_name
                );
                self.messages.insert(fragment.message_id.clone(), message);
                Some(fragment.message_id)
            }
        }
    }

    fn find_by_recipient(&self, fragment: &RosterFragment) -> Option<String> {
        let (name, address) = match (&fragment.recipient_name, &fragment.recipient_address) {
            (Some(n), Some(a)) if !n.is_empty() && !a.is_empty() => (n, a),
            _ => return None,
        };
        self.messages
            .values()
            .find(|m| &m.recipient_name == name && &m.recipient_address == address)
            .map(|m| m.message_id.clone())
    }

    pub fn get(&self, message_id: &str) -> Option<&Message> {
        self.messages.get(message_id)
    }

    pub fn get_mut(&mut self, message_id: &str) -> Option<&mut Message> {
        self.messages.get_mut(message_id)
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.messages.contains_key(message_id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.values()
    }

    pub fn summary(&self) -> CampaignSummary {
        let mut summary = CampaignSummary::default();
        for message in self.messages.values() {
            summary.count(message.status);
        }
        summary
    }

    /// Empty the roster; only the explicit campaign-reset path calls this.
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
