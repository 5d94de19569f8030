//! Entitlement activation: converts a completed transaction into its
//! durable downstream effect.
//!
//! Invoked only from `resolve`, inside the same SQLite transaction as the
//! terminal-status write. A storage failure here rolls back the resolution
//! too, so a transaction can never be `completed` without its entitlement.

use rusqlite::Connection;

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{
    PurchaseGrant, Subscription, SubscriptionAction, Transaction, TransactionKind,
};

/// What activation did. The duplicate variants are safety nets: the claim
/// protocol is the primary idempotency mechanism, and these fire only if a
/// completion is somehow processed twice.
#[derive(Debug)]
pub enum ActivationOutcome {
    SubscriptionActivated(Subscription),
    /// A pending/active subscription already exists for (user, plan).
    AlreadySubscribed(Subscription),
    PurchaseGranted(PurchaseGrant),
    /// The grant for this transaction already exists.
    AlreadyGranted,
}

impl ActivationOutcome {
    pub fn subscription_id(&self) -> Option<&str> {
        match self {
            Self::SubscriptionActivated(s) | Self::AlreadySubscribed(s) => Some(&s.id),
            _ => None,
        }
    }
}

/// Activate the entitlement for `txn` at time `now`.
///
/// `conn` must be the same transaction that carries the terminal-status
/// write.
pub fn activate(conn: &Connection, txn: &Transaction, now: i64) -> Result<ActivationOutcome> {
    match txn.kind {
        TransactionKind::Subscription => activate_subscription(conn, txn, now),
        TransactionKind::Purchase => grant_purchase(conn, txn, now),
    }
}

fn activate_subscription(
    conn: &Connection,
    txn: &Transaction,
    now: i64,
) -> Result<ActivationOutcome> {
    let plan_id = txn.plan_id.as_deref().ok_or_else(|| {
        AppError::Internal(format!("subscription transaction {} has no plan", txn.id))
    })?;

    // At most one pending/active subscription per (user, plan). Checked here,
    // in the same unit of work as the status transition that triggered us.
    if let Some(existing) = queries::find_live_subscription(conn, &txn.user_id, plan_id)? {
        tracing::warn!(
            "Duplicate completion for transaction {}: user {} already has live subscription {}",
            txn.id,
            txn.user_id,
            existing.id
        );
        return Ok(ActivationOutcome::AlreadySubscribed(existing));
    }

    let plan = queries::get_plan(conn, plan_id)?.ok_or_else(|| {
        AppError::Internal(format!("transaction {} references missing plan {}", txn.id, plan_id))
    })?;

    let subscription = queries::create_subscription(conn, &txn.user_id, &plan, &txn.id, None, now)?;
    queries::append_subscription_history(
        conn,
        &subscription.id,
        SubscriptionAction::Started,
        None,
        now,
    )?;

    tracing::info!(
        "Activated subscription {} for user {} on plan {} ({} {} snapshot)",
        subscription.id,
        txn.user_id,
        plan.name,
        subscription.price_cents_snapshot,
        subscription.currency_snapshot
    );

    Ok(ActivationOutcome::SubscriptionActivated(subscription))
}

fn grant_purchase(conn: &Connection, txn: &Transaction, now: i64) -> Result<ActivationOutcome> {
    let item_ref = txn.item_ref.as_deref().ok_or_else(|| {
        AppError::Internal(format!("purchase transaction {} has no item_ref", txn.id))
    })?;

    match queries::try_create_purchase_grant(conn, &txn.user_id, &txn.id, item_ref, now)? {
        Some(grant) => {
            tracing::info!(
                "Granted purchase {} to user {} for transaction {}",
                grant.item_ref,
                txn.user_id,
                txn.id
            );
            Ok(ActivationOutcome::PurchaseGranted(grant))
        }
        None => {
            tracing::warn!("Duplicate completion for transaction {}: grant already exists", txn.id);
            Ok(ActivationOutcome::AlreadyGranted)
        }
    }
}
