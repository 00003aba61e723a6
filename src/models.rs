use serde::{Deserialize, Serialize};

/// Delivery lifecycle of a single outbound message, as reported by the
/// messaging provider. The numeric values are the provider's wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum MessageStatus {
    Error,
    Pending,
    Sent,
    Delivered,
    Read,
    Played,
}

impl MessageStatus {
    pub fn as_code(self) -> i8 {
        match self {
            MessageStatus::Error => -1,
            MessageStatus::Pending => 0,
            MessageStatus::Sent => 1,
            MessageStatus::Delivered => 2,
            MessageStatus::Read => 3,
            MessageStatus::Played => 4,
        }
    }
}

impl TryFrom<i8> for MessageStatus {
    type Error = String;

    fn try_from(code: i8) -> Result<Self, String> {
        match code {
            -1 => Ok(MessageStatus::Error),
            0 => Ok(MessageStatus::Pending),
            1 => Ok(MessageStatus::Sent),
            2 => Ok(MessageStatus::Delivered),
            3 => Ok(MessageStatus::Read),
            4 => Ok(MessageStatus::Played),
            other => Err(format!("unknown status code: {}", other)),
        }
    }
}

impl From<MessageStatus> for i8 {
    fn from(status: MessageStatus) -> i8 {
        status.as_code()
    }
}

/// One outbound reminder in the campaign roster.
///
/// Identity (`message_id`) and recipient display data are immutable after
/// creation; `status` only ever changes through the merge engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub message_id: String,
    pub recipient_name: String,
    pub recipient_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointment_id: Option<String>,
    pub status: MessageStatus,
    pub added_at: i64,
    pub last_updated: i64,
}

/// A single status transition to feed the merge engine. Ephemeral: consumed
/// on apply, never stored beyond the dedup ledger.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub message_id: String,
    pub status: MessageStatus,
    pub observed_at: i64,
}

/// Per-status counts over the current roster, for the operator dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CampaignSummary {
    pub error: usize,
    pub pending: usize,
    pub sent: usize,
    pub delivered: usize,
    pub read: usize,
    pub played: usize,
}

impl CampaignSummary {
    pub fn total(&self) -> usize {
        self.error + self.pending + self.sent + self.delivered + self.read + self.played
    }

    pub fn count(&mut self, status: MessageStatus) {
        match status {
            MessageStatus::Error => self.error += 1,
            MessageStatus::Pending => self.pending += 1,
            MessageStatus::Sent => self.sent += 1,
            MessageStatus::Delivered => self.delivered += 1,
            MessageStatus::Read => self.read += 1,
            MessageStatus::Played => self.played += 1,
        }
    }
}

/// Current wall-clock time in unix milliseconds, the logical clock used for
/// `added_at` / `last_updated` stamps.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
