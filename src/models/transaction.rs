use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// Represents one payment attempt and its reconciliation lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    /// Provider-side identifier. Null until the provider payment page exists.
    pub provider_txn_id: Option<String>,
    pub user_id: String,
    /// Plan being bought; null for one-off purchases.
    pub plan_id: Option<String>,
    pub kind: TransactionKind,
    /// What a one-off purchase grants (content id, seat, etc.).
    pub item_ref: Option<String>,

    // Amounts (cents)
    pub amount_cents: i64,
    pub currency: String,
    pub payment_method: String,

    // Lifecycle
    pub status: TransactionStatus,
    pub processing_source: ProcessingSource,
    pub processing_attempts: i64,
    pub processing_started_at: Option<i64>,
    pub processing_completed_at: Option<i64>,

    // Race bookkeeping (derived audit data, not control state)
    pub race_condition_winner: Option<ProcessingSource>,
    pub webhook_received_at: Option<i64>,
    pub last_polling_check_at: Option<i64>,

    // Result
    /// Opaque normalized provider payload (JSON).
    pub provider_response: Option<String>,
    pub failure_reason: Option<String>,

    /// Hard deadline after which the transaction is force-terminated.
    pub expires_at: i64,

    /// Optimistic-lock version. Every lifecycle mutation is a conditional
    /// write keyed on the previously observed value.
    pub version: i64,
    pub created_at: i64,
}

impl Transaction {
    /// Whether the transaction has reached a state no automated transition
    /// leaves.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Data required to record a new payment attempt.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTransaction {
    pub user_id: String,
    pub plan_id: Option<String>,
    pub kind: TransactionKind,
    #[serde(default)]
    pub item_ref: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub payment_method: String,
    /// Explicit resolution deadline; defaults to now + configured window.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

/// Transaction lifecycle status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl TransactionStatus {
    /// Terminal statuses permit no further automated transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Expired
        )
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

/// Which actor currently holds (or last held) the processing claim.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProcessingSource {
    Webhook,
    Polling,
    Manual,
    None,
}

impl std::fmt::Display for ProcessingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

/// What the payment buys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Subscription,
    Purchase,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscription => "subscription",
            Self::Purchase => "purchase",
        }
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscription" => Ok(Self::Subscription),
            "purchase" => Ok(Self::Purchase),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry in a transaction's ordered status history.
#[derive(Debug, Clone, Serialize)]
pub struct StatusTransition {
    pub id: String,
    pub transaction_id: String,
    pub from_status: TransactionStatus,
    pub to_status: TransactionStatus,
    pub source: ProcessingSource,
    pub created_at: i64,
}
