//! Completion notices.
//!
//! When configured via `COMPLETION_WEBHOOK_URL`, the engine emits an event
//! for every completed transaction so the purchase/subscription-granting
//! collaborator can send receipts, emails, etc. Delivery is fire-and-forget:
//! the entitlement itself is already durable by the time a notice is sent.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;

/// Retry delays in milliseconds for completion notices.
/// Quick retries (100ms, 200ms) so a flaky listener never backs up intake.
const NOTIFY_RETRY_DELAYS: &[u64] = &[100, 200];

/// Payload posted to the completion listener (owned for async spawning).
#[derive(Debug, Clone, Serialize)]
pub struct CompletionNotice {
    /// Transaction ID (serves as idempotency key for the listener)
    pub transaction_id: String,
    pub user_id: String,
    /// "subscription" or "purchase"
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    /// Unix timestamp of the terminal transition
    pub completed_at: i64,
}

impl CompletionNotice {
    /// Build the notice for a just-completed transaction.
    pub fn for_transaction(
        txn: &crate::models::Transaction,
        activation: Option<&crate::reconcile::ActivationOutcome>,
        completed_at: i64,
    ) -> Self {
        Self {
            transaction_id: txn.id.clone(),
            user_id: txn.user_id.clone(),
            kind: txn.kind.as_str().to_string(),
            subscription_id: activation
                .and_then(|a| a.subscription_id())
                .map(String::from),
            amount_cents: txn.amount_cents,
            currency: txn.currency.clone(),
            completed_at,
        }
    }
}

/// Spawn a fire-and-forget completion notice.
///
/// If no listener is configured, this is a no-op. Failures are logged and
/// never affect the caller.
pub fn spawn_completion_notice(
    client: Client,
    notify_url: Option<String>,
    notice: CompletionNotice,
) {
    if let Some(url) = notify_url {
        tokio::spawn(async move {
            send_notice(&client, &url, &notice).await;
        });
    }
}

async fn send_notice(client: &Client, url: &str, notice: &CompletionNotice) {
    for (attempt, delay_ms) in std::iter::once(&0u64)
        .chain(NOTIFY_RETRY_DELAYS.iter())
        .enumerate()
    {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
        }

        match client
            .post(url)
            .json(notice)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                if attempt > 0 {
                    tracing::debug!("Completion notice succeeded after {} retries", attempt);
                }
                return;
            }
            Ok(resp) => {
                tracing::debug!("Completion notice returned {}", resp.status());
            }
            Err(e) => {
                tracing::debug!("Completion notice failed: {}", e);
            }
        }
    }

    tracing::warn!(
        "Completion notice for {} failed after {} attempts",
        notice.transaction_id,
        NOTIFY_RETRY_DELAYS.len() + 1
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delays_are_quick() {
        let total_delay: u64 = NOTIFY_RETRY_DELAYS.iter().sum();
        assert!(total_delay < 500, "Retry delays should be quick");
    }

    #[test]
    fn test_notice_serialization() {
        let notice = CompletionNotice {
            transaction_id: "tl_txn_abc".to_string(),
            user_id: "user_1".to_string(),
            kind: "subscription".to_string(),
            subscription_id: Some("tl_sub_def".to_string()),
            amount_cents: 7900,
            currency: "usd".to_string(),
            completed_at: 1234567890,
        };

        let json = serde_json::to_string(&notice).unwrap();
        assert!(json.contains("\"transaction_id\":\"tl_txn_abc\""));
        assert!(json.contains("\"amount_cents\":7900"));
    }

    #[test]
    fn test_notice_skips_none_subscription() {
        let notice = CompletionNotice {
            transaction_id: "tl_txn_abc".to_string(),
            user_id: "user_1".to_string(),
            kind: "purchase".to_string(),
            subscription_id: None,
            amount_cents: 500,
            currency: "usd".to_string(),
            completed_at: 1234567890,
        };

        let json = serde_json::to_string(&notice).unwrap();
        assert!(!json.contains("subscription_id"));
    }
}
