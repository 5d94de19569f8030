use serde::Serialize;

/// Durable access record produced by a completed one-off purchase.
/// Unique per transaction, which makes the grant naturally idempotent.
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseGrant {
    pub id: String,
    pub user_id: String,
    pub transaction_id: String,
    /// What was granted (content id, seat, etc.).
    pub item_ref: String,
    pub granted_at: i64,
}
