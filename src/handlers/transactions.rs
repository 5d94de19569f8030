//! Operator-facing transaction surface: record payment attempts at checkout
//! time, link them to their provider-side identifiers, and inspect their
//! reconciliation state.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::models::{
    AuditAction, AuditActor, CreatePlan, CreateTransaction, Plan, StatusTransition, Transaction,
    TransactionKind,
};
use crate::util::audit;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/plans", post(create_plan))
        .route("/plans/{id}", get(get_plan))
        .route("/transactions", post(create_transaction))
        .route("/transactions/{id}", get(get_transaction))
        .route("/transactions/{id}/provider", post(attach_provider))
}

async fn create_plan(
    State(state): State<AppState>,
    Json(input): Json<CreatePlan>,
) -> Result<(StatusCode, Json<Plan>)> {
    if input.price_cents < 0 {
        return Err(AppError::BadRequest("price_cents must be non-negative".into()));
    }
    let conn = state.db.get()?;
    let plan = queries::create_plan(&conn, &input)?;
    Ok((StatusCode::CREATED, Json(plan)))
}

async fn get_plan(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Plan>> {
    let conn = state.db.get()?;
    let plan = queries::get_plan(&conn, &id)?
        .ok_or_else(|| AppError::NotFound(format!("plan {}", id)))?;
    Ok(Json(plan))
}

async fn create_transaction(
    State(state): State<AppState>,
    Json(input): Json<CreateTransaction>,
) -> Result<(StatusCode, Json<Transaction>)> {
    match input.kind {
        TransactionKind::Subscription if input.plan_id.is_none() => {
            return Err(AppError::BadRequest(
                "subscription transactions require plan_id".into(),
            ));
        }
        TransactionKind::Purchase if input.item_ref.is_none() => {
            return Err(AppError::BadRequest(
                "purchase transactions require item_ref".into(),
            ));
        }
        _ => {}
    }
    if input.amount_cents < 0 {
        return Err(AppError::BadRequest("amount_cents must be non-negative".into()));
    }

    let conn = state.db.get()?;
    if let Some(plan_id) = &input.plan_id {
        if queries::get_plan(&conn, plan_id)?.is_none() {
            return Err(AppError::BadRequest(format!("unknown plan {}", plan_id)));
        }
    }

    let txn =
        queries::create_transaction(&conn, &input, state.recon.default_expiry_minutes)?;

    audit(
        &state,
        AuditActor::System,
        AuditAction::CreateTransaction,
        "transaction",
        &txn.id,
        Some(serde_json::json!({
            "user_id": txn.user_id,
            "kind": txn.kind.as_str(),
            "amount_cents": txn.amount_cents,
            "currency": txn.currency,
            "expires_at": txn.expires_at,
        })),
    );

    Ok((StatusCode::CREATED, Json(txn)))
}

#[derive(Debug, Deserialize)]
struct AttachProvider {
    provider_txn_id: String,
}

/// Link a transaction to the provider payment created for it. Rejected once
/// the transaction has been linked or has left `pending`.
async fn attach_provider(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<AttachProvider>,
) -> Result<impl IntoResponse> {
    let conn = state.db.get()?;
    if queries::get_transaction(&conn, &id)?.is_none() {
        return Err(AppError::NotFound(format!("transaction {}", id)));
    }
    let attached = queries::attach_provider_txn(&conn, &id, &input.provider_txn_id)?;
    if !attached {
        return Err(AppError::Conflict(
            "transaction already linked or no longer pending".into(),
        ));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
struct TransactionDetail {
    #[serde(flatten)]
    transaction: Transaction,
    status_history: Vec<StatusTransition>,
}

async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TransactionDetail>> {
    let conn = state.db.get()?;
    let transaction = queries::get_transaction(&conn, &id)?
        .ok_or_else(|| AppError::NotFound(format!("transaction {}", id)))?;
    let status_history = queries::list_status_history(&conn, &id)?;
    Ok(Json(TransactionDetail {
        transaction,
        status_history,
    }))
}
