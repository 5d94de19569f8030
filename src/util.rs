//! Shared utility functions for the Tally application.

use axum::http::HeaderMap;

use crate::db::{queries, AppState};
use crate::models::{AuditAction, AuditActor};

/// Extract client IP address and user-agent from request headers.
///
/// Tries `x-forwarded-for` first (for proxied requests), then `x-real-ip`,
/// and extracts the `user-agent` header for audit logging.
pub fn extract_request_info(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let ip = headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    (ip, user_agent)
}

/// Append an audit entry from a background actor (no request context).
/// Audit failures are logged and never escalate into the caller's flow.
pub fn audit(
    state: &AppState,
    actor: AuditActor,
    action: AuditAction,
    resource_type: &str,
    resource_id: &str,
    details: Option<serde_json::Value>,
) {
    audit_with_request(state, actor, action, resource_type, resource_id, details, None, None)
}

/// Append an audit entry carrying request sender metadata.
#[allow(clippy::too_many_arguments)]
pub fn audit_with_request(
    state: &AppState,
    actor: AuditActor,
    action: AuditAction,
    resource_type: &str,
    resource_id: &str,
    details: Option<serde_json::Value>,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
) {
    let conn = match state.audit.get() {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("Audit DB connection error: {}", e);
            return;
        }
    };

    if let Err(e) = queries::create_audit_log(
        &conn,
        state.audit_log_enabled,
        actor,
        action,
        resource_type,
        resource_id,
        details.as_ref(),
        ip_address,
        user_agent,
    ) {
        tracing::warn!("Failed to write audit log ({} {}): {}", actor.as_ref(), resource_id, e);
    }
}
