use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::id::EntityType;
use crate::models::*;

use super::from_row::{
    query_all, query_one, AUDIT_LOG_COLS, PLAN_COLS, PURCHASE_GRANT_COLS, STATUS_HISTORY_COLS,
    SUBSCRIPTION_COLS, SUBSCRIPTION_HISTORY_COLS, TRANSACTION_COLS, WEBHOOK_EVENT_COLS,
};

pub fn now() -> i64 {
    Utc::now().timestamp()
}

// ============ Plans ============

pub fn create_plan(conn: &Connection, input: &CreatePlan) -> Result<Plan> {
    let id = EntityType::Plan.gen_id();
    let created_at = now();

    conn.execute(
        "INSERT INTO plans (id, name, price_cents, currency, billing_interval, active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
        params![
            &id,
            &input.name,
            input.price_cents,
            &input.currency,
            input.billing_interval.as_ref(),
            created_at
        ],
    )?;

    Ok(Plan {
        id,
        name: input.name.clone(),
        price_cents: input.price_cents,
        currency: input.currency.clone(),
        billing_interval: input.billing_interval,
        active: true,
        created_at,
    })
}

pub fn get_plan(conn: &Connection, id: &str) -> Result<Option<Plan>> {
    query_one(
        conn,
        &format!("SELECT {} FROM plans WHERE id = ?1", PLAN_COLS),
        &[&id],
    )
}

// ============ Transactions ============

pub fn create_transaction(
    conn: &Connection,
    input: &CreateTransaction,
    default_expiry_minutes: i64,
) -> Result<Transaction> {
    let id = EntityType::Transaction.gen_id();
    let created_at = now();
    let expires_at = input
        .expires_at
        .unwrap_or(created_at + default_expiry_minutes * 60);

    conn.execute(
        "INSERT INTO transactions (id, provider_txn_id, user_id, plan_id, kind, item_ref,
            amount_cents, currency, payment_method, status, processing_source,
            processing_attempts, expires_at, version, created_at)
         VALUES (?1, NULL, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', 'none', 0, ?9, 0, ?10)",
        params![
            &id,
            &input.user_id,
            &input.plan_id,
            input.kind.as_str(),
            &input.item_ref,
            input.amount_cents,
            &input.currency,
            &input.payment_method,
            expires_at,
            created_at
        ],
    )?;

    Ok(Transaction {
        id,
        provider_txn_id: None,
        user_id: input.user_id.clone(),
        plan_id: input.plan_id.clone(),
        kind: input.kind,
        item_ref: input.item_ref.clone(),
        amount_cents: input.amount_cents,
        currency: input.currency.clone(),
        payment_method: input.payment_method.clone(),
        status: TransactionStatus::Pending,
        processing_source: ProcessingSource::None,
        processing_attempts: 0,
        processing_started_at: None,
        processing_completed_at: None,
        race_condition_winner: None,
        webhook_received_at: None,
        last_polling_check_at: None,
        provider_response: None,
        failure_reason: None,
        expires_at,
        version: 0,
        created_at,
    })
}

pub fn get_transaction(conn: &Connection, id: &str) -> Result<Option<Transaction>> {
    query_one(
        conn,
        &format!("SELECT {} FROM transactions WHERE id = ?1", TRANSACTION_COLS),
        &[&id],
    )
}

pub fn get_transaction_by_provider_txn(
    conn: &Connection,
    provider_txn_id: &str,
) -> Result<Option<Transaction>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM transactions WHERE provider_txn_id = ?1",
            TRANSACTION_COLS
        ),
        &[&provider_txn_id],
    )
}

/// Link a transaction to its provider-side identifier once the payment page
/// is created. Only valid while the transaction is still pending and unlinked.
pub fn attach_provider_txn(conn: &Connection, id: &str, provider_txn_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE transactions SET provider_txn_id = ?1, version = version + 1
         WHERE id = ?2 AND provider_txn_id IS NULL AND status = 'pending'",
        params![provider_txn_id, id],
    )?;
    Ok(affected > 0)
}

/// Compare-and-swap a transaction into `in_progress` under `source`.
///
/// Keyed on the caller's previously observed `version`: any interleaved
/// lifecycle write (claim, resolve, abandon) bumps the version and makes
/// this a no-op. The claimability predicate (pending, or stale in_progress)
/// is checked by the caller against the same observed row.
///
/// Returns true if this call took the claim.
pub fn claim_transaction_cas(
    conn: &Connection,
    id: &str,
    expected_version: i64,
    source: ProcessingSource,
    claim_now: i64,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE transactions SET
            status = 'in_progress',
            processing_source = ?1,
            processing_attempts = processing_attempts + 1,
            processing_started_at = ?2,
            version = version + 1
         WHERE id = ?3 AND version = ?4",
        params![source.as_ref(), claim_now, id, expected_version],
    )?;
    Ok(affected > 0)
}

/// Compare-and-swap the claim holder's `in_progress` row into a terminal
/// status. The guard re-asserts the holder (status + source + version), so a
/// resolution that lost the narrow window between claim and resolve affects
/// zero rows.
#[allow(clippy::too_many_arguments)]
pub fn resolve_transaction_cas(
    conn: &Connection,
    id: &str,
    expected_version: i64,
    source: ProcessingSource,
    to_status: TransactionStatus,
    provider_response: Option<&str>,
    failure_reason: Option<&str>,
    resolve_now: i64,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE transactions SET
            status = ?1,
            provider_response = COALESCE(?2, provider_response),
            failure_reason = ?3,
            processing_completed_at = ?4,
            version = version + 1
         WHERE id = ?5 AND version = ?6 AND status = 'in_progress' AND processing_source = ?7",
        params![
            to_status.as_ref(),
            provider_response,
            failure_reason,
            resolve_now,
            id,
            expected_version,
            source.as_ref()
        ],
    )?;
    Ok(affected > 0)
}

/// Release a held claim back to `pending` so a future sweep or webhook can
/// retry. Distinct from resolve: attempts are preserved, no terminal status
/// is written. `processing_source` keeps recording the last holder.
pub fn abandon_claim_cas(
    conn: &Connection,
    id: &str,
    expected_version: i64,
    source: ProcessingSource,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE transactions SET
            status = 'pending',
            processing_started_at = NULL,
            version = version + 1
         WHERE id = ?1 AND version = ?2 AND status = 'in_progress' AND processing_source = ?3",
        params![id, expected_version, source.as_ref()],
    )?;
    Ok(affected > 0)
}

/// Record which source won a contended claim. Derived audit data: written
/// without a version bump so it can never invalidate the winner's in-flight
/// resolve. Only the two racing producers are recordable.
pub fn record_race_winner(conn: &Connection, id: &str, winner: ProcessingSource) -> Result<()> {
    if !matches!(winner, ProcessingSource::Webhook | ProcessingSource::Polling) {
        return Ok(());
    }
    conn.execute(
        "UPDATE transactions SET race_condition_winner = ?1
         WHERE id = ?2 AND status = 'in_progress'",
        params![winner.as_ref(), id],
    )?;
    Ok(())
}

/// Bookkeeping write; no version bump.
pub fn touch_polling_check(conn: &Connection, id: &str, check_now: i64) -> Result<()> {
    conn.execute(
        "UPDATE transactions SET last_polling_check_at = ?1 WHERE id = ?2",
        params![check_now, id],
    )?;
    Ok(())
}

/// Bookkeeping write; no version bump.
pub fn set_webhook_received(conn: &Connection, id: &str, received_now: i64) -> Result<()> {
    conn.execute(
        "UPDATE transactions SET webhook_received_at = ?1 WHERE id = ?2",
        params![received_now, id],
    )?;
    Ok(())
}

// ============ Status History ============

pub fn append_status_transition(
    conn: &Connection,
    transaction_id: &str,
    from_status: TransactionStatus,
    to_status: TransactionStatus,
    source: ProcessingSource,
    at: i64,
) -> Result<StatusTransition> {
    let id = EntityType::StatusHistory.gen_id();
    conn.execute(
        "INSERT INTO transaction_status_history (id, transaction_id, from_status, to_status, source, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            &id,
            transaction_id,
            from_status.as_ref(),
            to_status.as_ref(),
            source.as_ref(),
            at
        ],
    )?;
    Ok(StatusTransition {
        id,
        transaction_id: transaction_id.to_string(),
        from_status,
        to_status,
        source,
        created_at: at,
    })
}

pub fn list_status_history(
    conn: &Connection,
    transaction_id: &str,
) -> Result<Vec<StatusTransition>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM transaction_status_history WHERE transaction_id = ?1 ORDER BY created_at, id",
            STATUS_HISTORY_COLS
        ),
        &[&transaction_id],
    )
}

// ============ Periodic Scans ============

/// Transactions overdue for a polling check: still open, not yet past their
/// resolution window, and not checked within the re-check interval.
pub fn sweep_candidates(
    conn: &Connection,
    scan_now: i64,
    recheck_interval_secs: i64,
    limit: i64,
) -> Result<Vec<Transaction>> {
    let cutoff = scan_now - recheck_interval_secs;
    query_all(
        conn,
        &format!(
            "SELECT {} FROM transactions
             WHERE status IN ('pending', 'in_progress')
               AND expires_at > ?1
               AND (last_polling_check_at IS NULL OR last_polling_check_at < ?2)
             ORDER BY created_at
             LIMIT ?3",
            TRANSACTION_COLS
        ),
        &[&scan_now, &cutoff, &limit],
    )
}

/// Transactions that have outlived their resolution window without a
/// terminal outcome.
pub fn reap_candidates(conn: &Connection, scan_now: i64, limit: i64) -> Result<Vec<Transaction>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM transactions
             WHERE status IN ('pending', 'in_progress') AND expires_at <= ?1
             ORDER BY expires_at
             LIMIT ?2",
            TRANSACTION_COLS
        ),
        &[&scan_now, &limit],
    )
}

// ============ Webhook Events ============

pub fn get_webhook_event_by_provider_event(
    conn: &Connection,
    provider: &str,
    provider_event_id: &str,
) -> Result<Option<WebhookEvent>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM webhook_events WHERE provider = ?1 AND provider_event_id = ?2",
            WEBHOOK_EVENT_COLS
        ),
        &[&provider, &provider_event_id],
    )
}

/// Persist a delivery with status `received`, before any processing.
///
/// Uses INSERT OR IGNORE against the (provider, provider_event_id) unique
/// key so two concurrent deliveries of the same event write exactly one row.
/// Returns None when another delivery already holds the row.
pub fn try_record_webhook_event(
    conn: &Connection,
    input: &RecordWebhookEvent,
) -> Result<Option<WebhookEvent>> {
    let id = EntityType::WebhookEvent.gen_id();
    let created_at = now();

    let affected = conn.execute(
        "INSERT OR IGNORE INTO webhook_events (id, provider, provider_event_id, event_type,
            payload, sender_ip, sender_user_agent, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'received', ?8)",
        params![
            &id,
            &input.provider,
            &input.provider_event_id,
            &input.event_type,
            &input.payload,
            &input.sender_ip,
            &input.sender_user_agent,
            created_at
        ],
    )?;

    if affected == 0 {
        return Ok(None);
    }

    Ok(Some(WebhookEvent {
        id,
        provider: input.provider.clone(),
        provider_event_id: input.provider_event_id.clone(),
        event_type: input.event_type.clone(),
        payload: input.payload.clone(),
        sender_ip: input.sender_ip.clone(),
        sender_user_agent: input.sender_user_agent.clone(),
        status: WebhookEventStatus::Received,
        transaction_id: None,
        subscription_id: None,
        error_message: None,
        processing_duration_ms: None,
        created_at,
    }))
}

pub fn mark_webhook_event_processing(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE webhook_events SET status = 'processing' WHERE id = ?1 AND status = 'received'",
        params![id],
    )?;
    Ok(affected > 0)
}

/// Record a delivery's final disposition. Write-once: the guard rejects a
/// second finalization of the same row.
#[allow(clippy::too_many_arguments)]
pub fn finish_webhook_event(
    conn: &Connection,
    id: &str,
    status: WebhookEventStatus,
    transaction_id: Option<&str>,
    subscription_id: Option<&str>,
    error_message: Option<&str>,
    processing_duration_ms: Option<i64>,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE webhook_events SET
            status = ?1,
            transaction_id = ?2,
            subscription_id = ?3,
            error_message = ?4,
            processing_duration_ms = ?5
         WHERE id = ?6 AND status IN ('received', 'processing')",
        params![
            status.as_ref(),
            transaction_id,
            subscription_id,
            error_message,
            processing_duration_ms,
            id
        ],
    )?;
    Ok(affected > 0)
}

// ============ Subscriptions ============

/// Find a pending or active subscription for (user, plan). The activator
/// runs this inside the same SQLite transaction as the status transition
/// that triggers it.
pub fn find_live_subscription(
    conn: &Connection,
    user_id: &str,
    plan_id: &str,
) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM subscriptions
             WHERE user_id = ?1 AND plan_id = ?2 AND status IN ('pending', 'active')",
            SUBSCRIPTION_COLS
        ),
        &[&user_id, &plan_id],
    )
}

/// Create an active subscription, snapshotting the plan's price at this
/// instant.
pub fn create_subscription(
    conn: &Connection,
    user_id: &str,
    plan: &Plan,
    transaction_id: &str,
    provider_subscription_id: Option<&str>,
    at: i64,
) -> Result<Subscription> {
    let id = EntityType::Subscription.gen_id();
    let next_billing_at = at + plan.billing_interval.period_secs();

    conn.execute(
        "INSERT INTO subscriptions (id, user_id, plan_id, transaction_id, status, started_at,
            ends_at, next_billing_at, price_cents_snapshot, currency_snapshot,
            provider_subscription_id, provider_status, created_at)
         VALUES (?1, ?2, ?3, ?4, 'active', ?5, NULL, ?6, ?7, ?8, ?9, NULL, ?10)",
        params![
            &id,
            user_id,
            &plan.id,
            transaction_id,
            at,
            next_billing_at,
            plan.price_cents,
            &plan.currency,
            provider_subscription_id,
            at
        ],
    )?;

    Ok(Subscription {
        id,
        user_id: user_id.to_string(),
        plan_id: plan.id.clone(),
        transaction_id: Some(transaction_id.to_string()),
        status: SubscriptionStatus::Active,
        started_at: at,
        ends_at: None,
        next_billing_at: Some(next_billing_at),
        price_cents_snapshot: plan.price_cents,
        currency_snapshot: plan.currency.clone(),
        provider_subscription_id: provider_subscription_id.map(String::from),
        provider_status: None,
        created_at: at,
    })
}

pub fn get_subscription(conn: &Connection, id: &str) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!("SELECT {} FROM subscriptions WHERE id = ?1", SUBSCRIPTION_COLS),
        &[&id],
    )
}

pub fn list_subscriptions_for_user(conn: &Connection, user_id: &str) -> Result<Vec<Subscription>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM subscriptions WHERE user_id = ?1 ORDER BY created_at",
            SUBSCRIPTION_COLS
        ),
        &[&user_id],
    )
}

pub fn append_subscription_history(
    conn: &Connection,
    subscription_id: &str,
    action: SubscriptionAction,
    previous_plan_id: Option<&str>,
    at: i64,
) -> Result<SubscriptionHistory> {
    let id = EntityType::SubscriptionHistory.gen_id();
    conn.execute(
        "INSERT INTO subscription_history (id, subscription_id, action, previous_plan_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&id, subscription_id, action.as_ref(), previous_plan_id, at],
    )?;
    Ok(SubscriptionHistory {
        id,
        subscription_id: subscription_id.to_string(),
        action,
        previous_plan_id: previous_plan_id.map(String::from),
        created_at: at,
    })
}

pub fn list_subscription_history(
    conn: &Connection,
    subscription_id: &str,
) -> Result<Vec<SubscriptionHistory>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM subscription_history WHERE subscription_id = ?1 ORDER BY created_at, id",
            SUBSCRIPTION_HISTORY_COLS
        ),
        &[&subscription_id],
    )
}

// ============ Purchase Grants ============

/// Grant the entitlement for a completed one-off purchase. Idempotent via
/// the UNIQUE(transaction_id) key: a duplicate grant returns None.
pub fn try_create_purchase_grant(
    conn: &Connection,
    user_id: &str,
    transaction_id: &str,
    item_ref: &str,
    at: i64,
) -> Result<Option<PurchaseGrant>> {
    let id = EntityType::PurchaseGrant.gen_id();
    let affected = conn.execute(
        "INSERT OR IGNORE INTO purchase_grants (id, user_id, transaction_id, item_ref, granted_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&id, user_id, transaction_id, item_ref, at],
    )?;

    if affected == 0 {
        return Ok(None);
    }

    Ok(Some(PurchaseGrant {
        id,
        user_id: user_id.to_string(),
        transaction_id: transaction_id.to_string(),
        item_ref: item_ref.to_string(),
        granted_at: at,
    }))
}

pub fn get_purchase_grant_by_transaction(
    conn: &Connection,
    transaction_id: &str,
) -> Result<Option<PurchaseGrant>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM purchase_grants WHERE transaction_id = ?1",
            PURCHASE_GRANT_COLS
        ),
        &[&transaction_id],
    )
}

// ============ Audit Logs ============

pub fn create_audit_log(
    conn: &Connection,
    enabled: bool,
    actor: AuditActor,
    action: AuditAction,
    resource_type: &str,
    resource_id: &str,
    details: Option<&serde_json::Value>,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
) -> Result<AuditLog> {
    let id = EntityType::AuditLog.gen_id();
    let timestamp = now();

    // Skip database insert if audit logging is disabled
    if enabled {
        let details_str = details.map(|d| d.to_string());
        conn.execute(
            "INSERT INTO audit_logs (id, timestamp, actor, action, resource_type, resource_id, details, ip_address, user_agent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                &id,
                timestamp,
                actor.as_ref(),
                action.as_ref(),
                resource_type,
                resource_id,
                &details_str,
                ip_address,
                user_agent
            ],
        )?;
    }

    Ok(AuditLog {
        id,
        timestamp,
        actor,
        action,
        resource_type: resource_type.to_string(),
        resource_id: resource_id.to_string(),
        details: details.cloned(),
        ip_address: ip_address.map(String::from),
        user_agent: user_agent.map(String::from),
    })
}

pub fn list_audit_logs_for_resource(
    conn: &Connection,
    resource_type: &str,
    resource_id: &str,
) -> Result<Vec<AuditLog>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM audit_logs WHERE resource_type = ?1 AND resource_id = ?2 ORDER BY timestamp, id",
            AUDIT_LOG_COLS
        ),
        &[&resource_type, &resource_id],
    )
}

/// Purge audit entries beyond the retention period. 0 days = keep forever.
/// Returns the number of deleted records.
pub fn purge_old_audit_logs(conn: &Connection, retention_days: i64) -> Result<usize> {
    let cutoff = now() - (retention_days * 86400);
    let deleted = conn.execute(
        "DELETE FROM audit_logs WHERE timestamp < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}

/// Count open (non-terminal) transactions; used by the health endpoint.
pub fn count_open_transactions(conn: &Connection) -> Result<i64> {
    let count = conn
        .query_row(
            "SELECT COUNT(*) FROM transactions WHERE status IN ('pending', 'in_progress')",
            [],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);
    Ok(count)
}
