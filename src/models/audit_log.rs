use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// Who performed an audited action.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditActor {
    Webhook,
    Polling,
    Reaper,
    Manual,
    System,
}

/// Audited actions. Stored as snake_case text.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditAction {
    CreateTransaction,
    ClaimTransaction,
    LoseRace,
    ResolveTransaction,
    AbandonClaim,
    ExpireTransaction,
    ReceiveWebhook,
    RejectWebhook,
    ActivateSubscription,
    GrantPurchase,
    NotifyCompletion,
}

/// One append-only audit entry. Written for every claim attempt outcome,
/// every resolution, every abandon, and every webhook disposition.
#[derive(Debug, Clone, Serialize)]
pub struct AuditLog {
    pub id: String,
    pub timestamp: i64,
    pub actor: AuditActor,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: String,
    pub details: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}
