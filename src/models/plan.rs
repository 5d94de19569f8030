use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// A purchasable subscription plan. The activator snapshots `price_cents`
/// and `currency` onto the subscription at activation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub price_cents: i64,
    pub currency: String,
    pub billing_interval: BillingInterval,
    pub active: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePlan {
    pub name: String,
    pub price_cents: i64,
    pub currency: String,
    pub billing_interval: BillingInterval,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BillingInterval {
    Monthly,
    Yearly,
}

impl BillingInterval {
    /// Billing period length in seconds. Months are billed as 30 days;
    /// the provider's own cycle is authoritative for real renewal dates.
    pub fn period_secs(&self) -> i64 {
        match self {
            Self::Monthly => 30 * 86400,
            Self::Yearly => 365 * 86400,
        }
    }
}
