//! Prefixed ID generation for Tally entities.
//!
//! All IDs use a `tl_` brand prefix to guarantee collision avoidance with
//! payment provider IDs (`pay_`, `evt_`, `sub_`, etc.).
//!
//! Format: `tl_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use uuid::Uuid;

/// All known entity prefixes for validation.
const ALL_PREFIXES: &[&str] = &[
    "tl_txn_",
    "tl_sub_",
    "tl_shist_",
    "tl_whk_",
    "tl_plan_",
    "tl_grant_",
    "tl_hist_",
    "tl_aud_",
];

/// Validate that a string is a valid Tally prefixed ID.
///
/// This is a cheap check to reject garbage before hitting the database.
/// Validates format: `tl_{entity}_{32_hex_chars}`
pub fn is_valid_prefixed_id(s: &str) -> bool {
    // Must start with a known prefix
    let Some(prefix) = ALL_PREFIXES.iter().find(|p| s.starts_with(*p)) else {
        return false;
    };

    // Get the hex part after the prefix
    let hex_part = &s[prefix.len()..];

    // Must be exactly 32 hex characters
    hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

/// Entity types that have prefixed IDs in Tally.
#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    Transaction,
    Subscription,
    SubscriptionHistory,
    WebhookEvent,
    Plan,
    PurchaseGrant,
    StatusHistory,
    AuditLog,
}

impl EntityType {
    /// Returns the prefix for this entity type.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Transaction => "tl_txn",
            Self::Subscription => "tl_sub",
            Self::SubscriptionHistory => "tl_shist",
            Self::WebhookEvent => "tl_whk",
            Self::Plan => "tl_plan",
            Self::PurchaseGrant => "tl_grant",
            Self::StatusHistory => "tl_hist",
            Self::AuditLog => "tl_aud",
        }
    }

    /// Generates a new prefixed ID for this entity type.
    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}
