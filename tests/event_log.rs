//! Append-only log tests: webhook delivery records, replay detection keys,
//! and the audit trail.

#[path = "common/mod.rs"]
mod common;

use common::*;

fn record(event_id: &str) -> RecordWebhookEvent {
    RecordWebhookEvent {
        provider: "provider".to_string(),
        provider_event_id: event_id.to_string(),
        event_type: "payment.succeeded".to_string(),
        payload: r#"{"id":"evt"}"#.to_string(),
        sender_ip: Some("10.0.0.1".to_string()),
        sender_user_agent: Some("provider-hooks/1.0".to_string()),
    }
}

// ============ Webhook Event Log ============

#[test]
fn test_record_webhook_event_persists_raw_delivery() {
    let conn = setup_test_db();

    let stored = queries::try_record_webhook_event(&conn, &record("evt_1"))
        .expect("record should not error")
        .expect("first recording should insert");

    assert_eq!(stored.status, WebhookEventStatus::Received);
    assert!(stored.id.starts_with("tl_whk_"));

    let fetched = queries::get_webhook_event_by_provider_event(&conn, "provider", "evt_1")
        .expect("query failed")
        .expect("event should exist");
    assert_eq!(fetched.id, stored.id);
    assert_eq!(fetched.payload, r#"{"id":"evt"}"#);
    assert_eq!(fetched.sender_ip.as_deref(), Some("10.0.0.1"));
    assert!(fetched.transaction_id.is_none());
    assert!(fetched.processing_duration_ms.is_none());
}

#[test]
fn test_duplicate_event_id_writes_one_row() {
    let conn = setup_test_db();

    let first = queries::try_record_webhook_event(&conn, &record("evt_dup")).unwrap();
    assert!(first.is_some(), "first recording should insert");

    let second = queries::try_record_webhook_event(&conn, &record("evt_dup")).unwrap();
    assert!(second.is_none(), "duplicate recording should be ignored");

    let third = queries::try_record_webhook_event(&conn, &record("evt_dup")).unwrap();
    assert!(third.is_none(), "third recording should also be ignored");
}

#[test]
fn test_same_event_id_different_provider_is_distinct() {
    let conn = setup_test_db();

    let mut other = record("evt_shared");
    other.provider = "other_provider".to_string();

    assert!(queries::try_record_webhook_event(&conn, &record("evt_shared")).unwrap().is_some());
    assert!(
        queries::try_record_webhook_event(&conn, &other).unwrap().is_some(),
        "replay detection keys on (provider, event_id)"
    );
}

#[test]
fn test_webhook_event_disposition_is_write_once() {
    let conn = setup_test_db();
    let stored = queries::try_record_webhook_event(&conn, &record("evt_once"))
        .unwrap()
        .unwrap();

    assert!(queries::mark_webhook_event_processing(&conn, &stored.id).unwrap());

    let finished = queries::finish_webhook_event(
        &conn,
        &stored.id,
        WebhookEventStatus::Completed,
        Some("tl_txn_x"),
        None,
        None,
        Some(12),
    )
    .unwrap();
    assert!(finished, "first disposition should be recorded");

    // A second disposition must not rewrite the record
    let again = queries::finish_webhook_event(
        &conn,
        &stored.id,
        WebhookEventStatus::Failed,
        None,
        None,
        Some("late failure"),
        Some(99),
    )
    .unwrap();
    assert!(!again, "disposition is write-once");

    let row = queries::get_webhook_event_by_provider_event(&conn, "provider", "evt_once")
        .unwrap()
        .unwrap();
    assert_eq!(row.status, WebhookEventStatus::Completed);
    assert_eq!(row.processing_duration_ms, Some(12));
    assert!(row.error_message.is_none());
}

// ============ Status History Ordering ============

#[test]
fn test_status_history_preserves_order() {
    let conn = setup_test_db();
    let plan = create_test_plan(&conn, "Pro", 7900);
    let txn = create_subscription_txn(&conn, "user_1", &plan, None, None);

    let t = now();
    queries::append_status_transition(
        &conn,
        &txn.id,
        TransactionStatus::Pending,
        TransactionStatus::InProgress,
        ProcessingSource::Polling,
        t,
    )
    .unwrap();
    queries::append_status_transition(
        &conn,
        &txn.id,
        TransactionStatus::InProgress,
        TransactionStatus::Pending,
        ProcessingSource::Polling,
        t + 1,
    )
    .unwrap();
    queries::append_status_transition(
        &conn,
        &txn.id,
        TransactionStatus::Pending,
        TransactionStatus::InProgress,
        ProcessingSource::Webhook,
        t + 2,
    )
    .unwrap();

    let history = queries::list_status_history(&conn, &txn.id).unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].source, ProcessingSource::Polling);
    assert_eq!(history[1].to_status, TransactionStatus::Pending);
    assert_eq!(history[2].source, ProcessingSource::Webhook);
    assert!(history.windows(2).all(|w| w[0].created_at <= w[1].created_at));
}

// ============ Audit Log ============

#[test]
fn test_audit_log_round_trip() {
    let conn = setup_test_audit_db();

    let created = queries::create_audit_log(
        &conn,
        true,
        AuditActor::Webhook,
        AuditAction::ResolveTransaction,
        "transaction",
        "tl_txn_abc",
        Some(&serde_json::json!({ "status": "completed" })),
        Some("10.0.0.1"),
        Some("provider-hooks/1.0"),
    )
    .expect("audit insert should succeed");

    let logs = queries::list_audit_logs_for_resource(&conn, "transaction", "tl_txn_abc").unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].id, created.id);
    assert_eq!(logs[0].actor, AuditActor::Webhook);
    assert_eq!(logs[0].action, AuditAction::ResolveTransaction);
    assert_eq!(logs[0].details.as_ref().unwrap()["status"], "completed");
    assert_eq!(logs[0].ip_address.as_deref(), Some("10.0.0.1"));
}

#[test]
fn test_audit_log_disabled_skips_insert() {
    let conn = setup_test_audit_db();

    queries::create_audit_log(
        &conn,
        false,
        AuditActor::System,
        AuditAction::CreateTransaction,
        "transaction",
        "tl_txn_off",
        None,
        None,
        None,
    )
    .expect("call should succeed even when disabled");

    let logs = queries::list_audit_logs_for_resource(&conn, "transaction", "tl_txn_off").unwrap();
    assert!(logs.is_empty(), "disabled audit logging must not insert");
}

#[test]
fn test_purge_old_audit_logs() {
    let conn = setup_test_audit_db();

    queries::create_audit_log(
        &conn,
        true,
        AuditActor::System,
        AuditAction::CreateTransaction,
        "transaction",
        "tl_txn_old",
        None,
        None,
        None,
    )
    .unwrap();
    queries::create_audit_log(
        &conn,
        true,
        AuditActor::System,
        AuditAction::CreateTransaction,
        "transaction",
        "tl_txn_new",
        None,
        None,
        None,
    )
    .unwrap();

    // Age one entry past the retention cutoff
    let two_days_ago = now() - 2 * 86400;
    conn.execute(
        "UPDATE audit_logs SET timestamp = ?1 WHERE resource_id = 'tl_txn_old'",
        rusqlite::params![two_days_ago],
    )
    .unwrap();

    let purged = queries::purge_old_audit_logs(&conn, 1).unwrap();
    assert_eq!(purged, 1);

    assert!(queries::list_audit_logs_for_resource(&conn, "transaction", "tl_txn_old")
        .unwrap()
        .is_empty());
    assert_eq!(
        queries::list_audit_logs_for_resource(&conn, "transaction", "tl_txn_new")
            .unwrap()
            .len(),
        1
    );
}

// ============ Reconciliation Audit Trail ============

#[tokio::test]
async fn test_sweep_writes_audit_trail() {
    use std::sync::Arc;

    let app = TestApp::new();
    let state = app.state.clone();

    let txn = {
        let conn = state.db.get().unwrap();
        let plan = create_test_plan(&conn, "Pro", 7900);
        create_subscription_txn(&conn, "user_1", &plan, Some("pay_audit"), None)
    };

    let gateway = Arc::new(MockGateway::returning(ProviderStatus::Succeeded));
    Sweeper::new(state.clone(), gateway)
        .sweep_once(now())
        .await
        .expect("sweep should not error");

    let audit_conn = state.audit.get().unwrap();
    let trail = queries::list_audit_logs_for_resource(&audit_conn, "transaction", &txn.id).unwrap();
    let actions: Vec<_> = trail.iter().map(|l| l.action).collect();
    assert!(actions.contains(&AuditAction::ClaimTransaction), "claim must be audited");
    assert!(actions.contains(&AuditAction::ResolveTransaction), "resolution must be audited");
    assert!(trail.iter().all(|l| l.actor == AuditActor::Polling));
}
