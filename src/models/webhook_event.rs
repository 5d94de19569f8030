use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// One received webhook delivery, persisted before any processing so the
/// raw payload survives a crash mid-pipeline.
///
/// Rows are append-only: a delivery is written once with status `received`
/// and later updated exactly once with its final disposition. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    pub provider: String,
    /// Provider's unique delivery id; the replay-detection key.
    pub provider_event_id: String,
    pub event_type: String,
    /// Raw request body, verbatim.
    pub payload: String,

    // Sender metadata
    pub sender_ip: Option<String>,
    pub sender_user_agent: Option<String>,

    pub status: WebhookEventStatus,
    /// Transaction this delivery resolved, when known.
    pub transaction_id: Option<String>,
    /// Subscription this delivery touched, when known.
    pub subscription_id: Option<String>,
    pub error_message: Option<String>,
    pub processing_duration_ms: Option<i64>,

    pub created_at: i64,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WebhookEventStatus {
    Received,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for WebhookEventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

/// Fields captured at intake time, before processing begins.
#[derive(Debug, Clone)]
pub struct RecordWebhookEvent {
    pub provider: String,
    pub provider_event_id: String,
    pub event_type: String,
    pub payload: String,
    pub sender_ip: Option<String>,
    pub sender_user_agent: Option<String>,
}
