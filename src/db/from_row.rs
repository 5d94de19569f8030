//! Row mapping trait and helpers for reducing boilerplate in queries.
//!
//! This module provides a `FromRow` trait that models can implement to
//! define how they are constructed from database rows, plus helper functions
//! for common query patterns.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
///
/// This provides graceful error handling instead of panicking when database
/// contains invalid enum values (from corruption, migration errors, etc.).
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Parse an optional string column into an optional enum.
fn parse_enum_opt<T: std::str::FromStr>(
    row: &Row,
    col: usize,
    col_name: &str,
) -> rusqlite::Result<Option<T>> {
    match row.get::<_, Option<String>>(col)? {
        Some(s) => s.parse::<T>().map(Some).map_err(|_| {
            rusqlite::Error::InvalidColumnType(
                col,
                col_name.to_string(),
                rusqlite::types::Type::Text,
            )
        }),
        None => Ok(None),
    }
}

/// Trait for constructing a type from a database row.
///
/// Implementing this trait allows using the `query_one` and `query_all`
/// helper functions, reducing repetitive row mapping closures.
pub trait FromRow: Sized {
    /// Construct an instance from a database row.
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const TRANSACTION_COLS: &str = "id, provider_txn_id, user_id, plan_id, kind, item_ref, \
    amount_cents, currency, payment_method, status, processing_source, processing_attempts, \
    processing_started_at, processing_completed_at, race_condition_winner, webhook_received_at, \
    last_polling_check_at, provider_response, failure_reason, expires_at, version, created_at";

pub const STATUS_HISTORY_COLS: &str =
    "id, transaction_id, from_status, to_status, source, created_at";

pub const WEBHOOK_EVENT_COLS: &str = "id, provider, provider_event_id, event_type, payload, \
    sender_ip, sender_user_agent, status, transaction_id, subscription_id, error_message, \
    processing_duration_ms, created_at";

pub const PLAN_COLS: &str = "id, name, price_cents, currency, billing_interval, active, created_at";

pub const SUBSCRIPTION_COLS: &str = "id, user_id, plan_id, transaction_id, status, started_at, \
    ends_at, next_billing_at, price_cents_snapshot, currency_snapshot, \
    provider_subscription_id, provider_status, created_at";

pub const SUBSCRIPTION_HISTORY_COLS: &str =
    "id, subscription_id, action, previous_plan_id, created_at";

pub const PURCHASE_GRANT_COLS: &str = "id, user_id, transaction_id, item_ref, granted_at";

pub const AUDIT_LOG_COLS: &str =
    "id, timestamp, actor, action, resource_type, resource_id, details, ip_address, user_agent";

// ============ FromRow Implementations ============

impl FromRow for Transaction {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Transaction {
            id: row.get(0)?,
            provider_txn_id: row.get(1)?,
            user_id: row.get(2)?,
            plan_id: row.get(3)?,
            kind: parse_enum(row, 4, "kind")?,
            item_ref: row.get(5)?,
            amount_cents: row.get(6)?,
            currency: row.get(7)?,
            payment_method: row.get(8)?,
            status: parse_enum(row, 9, "status")?,
            processing_source: parse_enum(row, 10, "processing_source")?,
            processing_attempts: row.get(11)?,
            processing_started_at: row.get(12)?,
            processing_completed_at: row.get(13)?,
            race_condition_winner: parse_enum_opt(row, 14, "race_condition_winner")?,
            webhook_received_at: row.get(15)?,
            last_polling_check_at: row.get(16)?,
            provider_response: row.get(17)?,
            failure_reason: row.get(18)?,
            expires_at: row.get(19)?,
            version: row.get(20)?,
            created_at: row.get(21)?,
        })
    }
}

impl FromRow for StatusTransition {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(StatusTransition {
            id: row.get(0)?,
            transaction_id: row.get(1)?,
            from_status: parse_enum(row, 2, "from_status")?,
            to_status: parse_enum(row, 3, "to_status")?,
            source: parse_enum(row, 4, "source")?,
            created_at: row.get(5)?,
        })
    }
}

impl FromRow for WebhookEvent {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(WebhookEvent {
            id: row.get(0)?,
            provider: row.get(1)?,
            provider_event_id: row.get(2)?,
            event_type: row.get(3)?,
            payload: row.get(4)?,
            sender_ip: row.get(5)?,
            sender_user_agent: row.get(6)?,
            status: parse_enum(row, 7, "status")?,
            transaction_id: row.get(8)?,
            subscription_id: row.get(9)?,
            error_message: row.get(10)?,
            processing_duration_ms: row.get(11)?,
            created_at: row.get(12)?,
        })
    }
}

impl FromRow for Plan {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Plan {
            id: row.get(0)?,
            name: row.get(1)?,
            price_cents: row.get(2)?,
            currency: row.get(3)?,
            billing_interval: parse_enum(row, 4, "billing_interval")?,
            active: row.get::<_, i32>(5)? != 0,
            created_at: row.get(6)?,
        })
    }
}

impl FromRow for Subscription {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Subscription {
            id: row.get(0)?,
            user_id: row.get(1)?,
            plan_id: row.get(2)?,
            transaction_id: row.get(3)?,
            status: parse_enum(row, 4, "status")?,
            started_at: row.get(5)?,
            ends_at: row.get(6)?,
            next_billing_at: row.get(7)?,
            price_cents_snapshot: row.get(8)?,
            currency_snapshot: row.get(9)?,
            provider_subscription_id: row.get(10)?,
            provider_status: row.get(11)?,
            created_at: row.get(12)?,
        })
    }
}

impl FromRow for SubscriptionHistory {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(SubscriptionHistory {
            id: row.get(0)?,
            subscription_id: row.get(1)?,
            action: parse_enum(row, 2, "action")?,
            previous_plan_id: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

impl FromRow for PurchaseGrant {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PurchaseGrant {
            id: row.get(0)?,
            user_id: row.get(1)?,
            transaction_id: row.get(2)?,
            item_ref: row.get(3)?,
            granted_at: row.get(4)?,
        })
    }
}

impl FromRow for AuditLog {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let details: Option<String> = row.get(6)?;
        Ok(AuditLog {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            actor: parse_enum(row, 2, "actor")?,
            action: parse_enum(row, 3, "action")?,
            resource_type: row.get(4)?,
            resource_id: row.get(5)?,
            details: details.and_then(|d| serde_json::from_str(&d).ok()),
            ip_address: row.get(7)?,
            user_agent: row.get(8)?,
        })
    }
}
