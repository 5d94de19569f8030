use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// A recurring entitlement derived from one completed transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub plan_id: String,
    /// Originating transaction. Nullable so old transactions can be cleaned
    /// up without orphaning the subscription.
    pub transaction_id: Option<String>,
    pub status: SubscriptionStatus,

    // Billing
    pub started_at: i64,
    pub ends_at: Option<i64>,
    pub next_billing_at: Option<i64>,
    /// Price captured at activation time. Immutable even if the plan's
    /// price changes later.
    pub price_cents_snapshot: i64,
    pub currency_snapshot: String,

    pub provider_subscription_id: Option<String>,
    pub provider_status: Option<String>,

    pub created_at: i64,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Cancelled,
    Expired,
    Failed,
}

impl SubscriptionStatus {
    /// Statuses that count toward the at-most-one-per-(user, plan) rule.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Pending | Self::Active)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

/// Append-only audit of subscription lifecycle actions.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionHistory {
    pub id: String,
    pub subscription_id: String,
    pub action: SubscriptionAction,
    /// Previous plan, for upgrades/downgrades.
    pub previous_plan_id: Option<String>,
    pub created_at: i64,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubscriptionAction {
    Started,
    Upgraded,
    Downgraded,
    Cancelled,
    Renewed,
    Expired,
    Failed,
}

impl std::fmt::Display for SubscriptionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_statuses() {
        assert!(SubscriptionStatus::Pending.is_live());
        assert!(SubscriptionStatus::Active.is_live());
        assert!(!SubscriptionStatus::Cancelled.is_live());
        assert!(!SubscriptionStatus::Expired.is_live());
        assert!(!SubscriptionStatus::Failed.is_live());
    }
}
