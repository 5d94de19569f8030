//! Webhook intake: producer #1 of the reconciliation engine.
//!
//! Every delivery is persisted before any processing, so the raw payload
//! survives a crash mid-pipeline. The provider is answered 200 as soon as
//! the delivery is durably logged; only signature failures earn a 4xx.

use std::time::Instant;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use serde::Deserialize;

use crate::db::{queries, AppState};
use crate::models::{
    AuditAction, AuditActor, ProcessingSource, RecordWebhookEvent, WebhookEventStatus,
};
use crate::notify::{spawn_completion_notice, CompletionNotice};
use crate::provider::ProviderStatus;
use crate::reconcile::claim::{self, ClaimOutcome};
use crate::reconcile::Resolution;
use crate::util::{audit_with_request, extract_request_info};

/// Result type for webhook operations.
pub type WebhookResult = (StatusCode, &'static str);

/// Provider name recorded on every delivery. A single provider is
/// supported; multi-provider routing is out of scope.
const PROVIDER: &str = "provider";

const SIGNATURE_HEADER: &str = "x-provider-signature";

/// Inbound push payload, normalized:
/// `{ "id": "evt_..", "type": "payment.succeeded",
///    "data": { "payment_id": "pay_..", "status": "succeeded", ... } }`
#[derive(Debug, Deserialize)]
struct ProviderWebhook {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: ProviderWebhookData,
}

#[derive(Debug, Deserialize)]
struct ProviderWebhookData {
    payment_id: String,
    status: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/webhook/payments", post(handle_payment_webhook))
}

pub async fn handle_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResult {
    let started = Instant::now();
    let (sender_ip, sender_ua) = extract_request_info(&headers);

    // Signature header must be present before we do anything else.
    let signature = match headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) {
        Some(s) => s.to_string(),
        None => return (StatusCode::BAD_REQUEST, "Missing signature header"),
    };

    // Parse the envelope; an unparseable body has no event id to log under.
    let event: ProviderWebhook = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            tracing::debug!("Unparseable webhook body: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };

    let mut conn = match state.db.get() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("DB connection error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    // Replay detection: a redelivery of an already-dispositioned event
    // short-circuits without touching the transaction again.
    match queries::get_webhook_event_by_provider_event(&conn, PROVIDER, &event.id) {
        Ok(Some(existing)) => {
            return match existing.status {
                WebhookEventStatus::Completed => (StatusCode::OK, "Already processed"),
                _ => (StatusCode::OK, "Already received"),
            };
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!("DB error on replay lookup: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    }

    // Persist the raw delivery before any processing.
    let record = RecordWebhookEvent {
        provider: PROVIDER.to_string(),
        provider_event_id: event.id.clone(),
        event_type: event.event_type.clone(),
        payload: String::from_utf8_lossy(&body).into_owned(),
        sender_ip: sender_ip.clone(),
        sender_user_agent: sender_ua.clone(),
    };
    let stored = match queries::try_record_webhook_event(&conn, &record) {
        Ok(Some(row)) => row,
        // Concurrent duplicate delivery won the insert; let it drive.
        Ok(None) => return (StatusCode::OK, "Already received"),
        Err(e) => {
            tracing::error!("Failed to record webhook event: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    audit_with_request(
        &state,
        AuditActor::Webhook,
        AuditAction::ReceiveWebhook,
        "webhook_event",
        &stored.id,
        Some(serde_json::json!({
            "provider_event_id": event.id,
            "event_type": event.event_type,
        })),
        sender_ip.as_deref(),
        sender_ua.as_deref(),
    );

    // Authenticity check. An unverifiable payload is dispositioned and
    // rejected with a 4xx; the provider may retry on its own.
    let verified = match state.verifier.verify(&body, &signature) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!("Malformed webhook signature: {}", e);
            fail_event(&conn, &stored.id, "malformed signature", started);
            audit_reject(&state, &stored.id, "malformed signature", &sender_ip, &sender_ua);
            return (StatusCode::BAD_REQUEST, "Invalid signature header");
        }
    };
    if !verified {
        fail_event(&conn, &stored.id, "signature verification failed", started);
        audit_reject(&state, &stored.id, "signature verification failed", &sender_ip, &sender_ua);
        return (StatusCode::BAD_REQUEST, "Invalid signature");
    }

    if let Err(e) = queries::mark_webhook_event_processing(&conn, &stored.id) {
        tracing::warn!("Failed to mark webhook event processing: {}", e);
    }

    // The claimed status must be in our vocabulary before we take a claim.
    let Some(claimed_status) = ProviderStatus::parse(&event.data.status) else {
        fail_event(&conn, &stored.id, "unrecognized status", started);
        return (StatusCode::BAD_REQUEST, "Unrecognized status");
    };
    if claimed_status.terminal_status().is_none() {
        // Non-terminal notice; a later webhook or the sweeper finalizes.
        finish_event(&conn, &stored.id, None, None, started);
        return (StatusCode::OK, "Non-terminal status ignored");
    }

    // Resolve the provider's payment id to a local transaction. Absence is
    // expected under out-of-order delivery and is not escalated.
    let txn = match queries::get_transaction_by_provider_txn(&conn, &event.data.payment_id) {
        Ok(Some(t)) => t,
        Ok(None) => {
            tracing::info!(
                "Webhook {} references unknown transaction {}",
                event.id,
                event.data.payment_id
            );
            fail_event(&conn, &stored.id, "unknown transaction", started);
            return (StatusCode::OK, "Unknown transaction");
        }
        Err(e) => {
            tracing::error!("DB error resolving provider txn: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    let now = queries::now();
    if let Err(e) = queries::set_webhook_received(&conn, &txn.id, now) {
        tracing::warn!("Failed to stamp webhook_received_at: {}", e);
    }

    // Race the other producers for the claim.
    let claim = match claim::try_claim(&mut conn, &txn.id, ProcessingSource::Webhook, now, &state.recon) {
        Ok(ClaimOutcome::Claimed(c)) => c,
        Ok(ClaimOutcome::LostRace { winner }) => {
            // Someone else is resolving (or resolved) it; our work is done.
            audit_with_request(
                &state,
                AuditActor::Webhook,
                AuditAction::LoseRace,
                "transaction",
                &txn.id,
                Some(serde_json::json!({ "winner": winner, "event_id": event.id })),
                sender_ip.as_deref(),
                sender_ua.as_deref(),
            );
            finish_event(&conn, &stored.id, Some(&txn.id), None, started);
            return (StatusCode::OK, "Already resolved");
        }
        Ok(ClaimOutcome::NotFound) => {
            fail_event(&conn, &stored.id, "unknown transaction", started);
            return (StatusCode::OK, "Unknown transaction");
        }
        Err(e) => {
            tracing::error!("Claim failed: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    audit_with_request(
        &state,
        AuditActor::Webhook,
        AuditAction::ClaimTransaction,
        "transaction",
        &txn.id,
        Some(serde_json::json!({ "event_id": event.id })),
        sender_ip.as_deref(),
        sender_ua.as_deref(),
    );

    let provider_response = serde_json::json!({
        "status": claimed_status.as_str(),
        "event_id": event.id,
        "event_type": event.event_type,
    })
    .to_string();
    let outcome = match claim::outcome_from_provider_status(claimed_status, Some(provider_response))
    {
        Ok(o) => o,
        Err(_) => {
            fail_event(&conn, &stored.id, "unrecognized status", started);
            return (StatusCode::BAD_REQUEST, "Unrecognized status");
        }
    };

    let txn_snapshot = claim.transaction().clone();
    let resolution = match claim::resolve(&mut conn, claim, outcome, now) {
        Ok(r) => r,
        Err(e) => {
            // The claim stays in_progress and becomes reclaimable once
            // stale; the provider will retry or the sweeper recovers.
            tracing::error!("Resolve failed for {}: {}", txn.id, e);
            fail_event(&conn, &stored.id, "storage failure during resolve", started);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    let subscription_id = match &resolution {
        Resolution::Resolved { status, activation } => {
            audit_with_request(
                &state,
                AuditActor::Webhook,
                AuditAction::ResolveTransaction,
                "transaction",
                &txn.id,
                Some(serde_json::json!({ "status": status.as_ref(), "event_id": event.id })),
                sender_ip.as_deref(),
                sender_ua.as_deref(),
            );
            if *status == crate::models::TransactionStatus::Completed {
                spawn_completion_notice(
                    state.http_client.clone(),
                    state.completion_webhook_url.clone(),
                    CompletionNotice::for_transaction(&txn_snapshot, activation.as_ref(), now),
                );
            }
            activation
                .as_ref()
                .and_then(|a| a.subscription_id())
                .map(String::from)
        }
        Resolution::AlreadyResolved => None,
    };

    finish_event(&conn, &stored.id, Some(&txn.id), subscription_id.as_deref(), started);

    (StatusCode::OK, "OK")
}

/// Record a delivery's successful disposition with its processing duration.
fn finish_event(
    conn: &rusqlite::Connection,
    event_id: &str,
    transaction_id: Option<&str>,
    subscription_id: Option<&str>,
    started: Instant,
) {
    let duration_ms = started.elapsed().as_millis() as i64;
    if let Err(e) = queries::finish_webhook_event(
        conn,
        event_id,
        WebhookEventStatus::Completed,
        transaction_id,
        subscription_id,
        None,
        Some(duration_ms),
    ) {
        tracing::warn!("Failed to finish webhook event {}: {}", event_id, e);
    }
}

/// Record a delivery's failure disposition.
fn fail_event(conn: &rusqlite::Connection, event_id: &str, reason: &str, started: Instant) {
    let duration_ms = started.elapsed().as_millis() as i64;
    if let Err(e) = queries::finish_webhook_event(
        conn,
        event_id,
        WebhookEventStatus::Failed,
        None,
        None,
        Some(reason),
        Some(duration_ms),
    ) {
        tracing::warn!("Failed to fail webhook event {}: {}", event_id, e);
    }
}

fn audit_reject(
    state: &AppState,
    event_id: &str,
    reason: &str,
    sender_ip: &Option<String>,
    sender_ua: &Option<String>,
) {
    audit_with_request(
        state,
        AuditActor::Webhook,
        AuditAction::RejectWebhook,
        "webhook_event",
        event_id,
        Some(serde_json::json!({ "reason": reason })),
        sender_ip.as_deref(),
        sender_ua.as_deref(),
    );
}
