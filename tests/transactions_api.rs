//! Operator surface tests: recording payment attempts, provider linking,
//! and transaction inspection.

#[path = "common/mod.rs"]
mod common;

use axum::{body::Body, http::Request, Router};
use common::*;
use serde_json::{json, Value};
use tower::ServiceExt;

fn api_app(state: AppState) -> Router {
    tally::handlers::router().with_state(state)
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (axum::http::StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn get_json(app: &Router, uri: &str) -> (axum::http::StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_create_and_fetch_transaction() {
    let fixture = TestApp::new();
    let app = api_app(fixture.state.clone());

    let (_, plan) = post_json(
        &app,
        "/plans",
        json!({
            "name": "Pro",
            "price_cents": 7900,
            "currency": "usd",
            "billing_interval": "monthly"
        }),
    )
    .await;
    let plan_id = plan["id"].as_str().unwrap().to_string();

    let (status, txn) = post_json(
        &app,
        "/transactions",
        json!({
            "user_id": "user_1",
            "plan_id": plan_id,
            "kind": "subscription",
            "amount_cents": 7900,
            "currency": "usd",
            "payment_method": "card"
        }),
    )
    .await;
    assert_eq!(status, axum::http::StatusCode::CREATED);
    assert_eq!(txn["status"], "pending");
    assert_eq!(txn["processing_source"], "none");
    assert_eq!(txn["version"], 0);
    assert!(txn["expires_at"].as_i64().unwrap() > now(), "default expiry window applied");

    let id = txn["id"].as_str().unwrap();
    let (status, detail) = get_json(&app, &format!("/transactions/{}", id)).await;
    assert_eq!(status, axum::http::StatusCode::OK);
    assert_eq!(detail["id"], txn["id"]);
    assert_eq!(detail["status_history"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_create_transaction_validation() {
    let fixture = TestApp::new();
    let app = api_app(fixture.state.clone());

    // Subscription without a plan
    let (status, _) = post_json(
        &app,
        "/transactions",
        json!({
            "user_id": "user_1",
            "kind": "subscription",
            "amount_cents": 7900,
            "currency": "usd",
            "payment_method": "card"
        }),
    )
    .await;
    assert_eq!(status, axum::http::StatusCode::BAD_REQUEST);

    // Purchase without an item_ref
    let (status, _) = post_json(
        &app,
        "/transactions",
        json!({
            "user_id": "user_1",
            "kind": "purchase",
            "amount_cents": 500,
            "currency": "usd",
            "payment_method": "card"
        }),
    )
    .await;
    assert_eq!(status, axum::http::StatusCode::BAD_REQUEST);

    // Unknown plan
    let (status, _) = post_json(
        &app,
        "/transactions",
        json!({
            "user_id": "user_1",
            "plan_id": "tl_plan_00000000000000000000000000000000",
            "kind": "subscription",
            "amount_cents": 7900,
            "currency": "usd",
            "payment_method": "card"
        }),
    )
    .await;
    assert_eq!(status, axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_attach_provider_is_one_shot() {
    let fixture = TestApp::new();
    let state = fixture.state.clone();
    let app = api_app(state.clone());

    let txn = {
        let conn = state.db.get().unwrap();
        let plan = create_test_plan(&conn, "Pro", 7900);
        create_subscription_txn(&conn, "user_1", &plan, None, None)
    };

    let (status, _) = post_json(
        &app,
        &format!("/transactions/{}/provider", txn.id),
        json!({ "provider_txn_id": "pay_link_1" }),
    )
    .await;
    assert_eq!(status, axum::http::StatusCode::NO_CONTENT);

    // Second link attempt conflicts
    let (status, _) = post_json(
        &app,
        &format!("/transactions/{}/provider", txn.id),
        json!({ "provider_txn_id": "pay_link_2" }),
    )
    .await;
    assert_eq!(status, axum::http::StatusCode::CONFLICT);

    let conn = state.db.get().unwrap();
    let row = queries::get_transaction(&conn, &txn.id).unwrap().unwrap();
    assert_eq!(row.provider_txn_id.as_deref(), Some("pay_link_1"));
}

#[tokio::test]
async fn test_get_unknown_transaction_is_404() {
    let fixture = TestApp::new();
    let app = api_app(fixture.state.clone());

    let (status, _) =
        get_json(&app, "/transactions/tl_txn_00000000000000000000000000000000").await;
    assert_eq!(status, axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_reports_open_transactions() {
    let fixture = TestApp::new();
    let state = fixture.state.clone();

    {
        let conn = state.db.get().unwrap();
        let plan = create_test_plan(&conn, "Pro", 7900);
        create_subscription_txn(&conn, "user_1", &plan, None, None);
        create_subscription_txn(&conn, "user_2", &plan, None, None);
    }

    let app = api_app(state);
    let (status, body) = get_json(&app, "/health").await;
    assert_eq!(status, axum::http::StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["open_transactions"], 2);
}
