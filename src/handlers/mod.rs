pub mod transactions;
pub mod webhooks;

use axum::{extract::State, routing::get, Json, Router};
use serde_json::json;

use crate::db::{queries, AppState};
use crate::error::Result;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .merge(webhooks::router())
        .merge(transactions::router())
}

async fn health(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let conn = state.db.get()?;
    let open = queries::count_open_transactions(&conn)?;
    Ok(Json(json!({ "status": "ok", "open_transactions": open })))
}
