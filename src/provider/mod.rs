//! Payment provider gateway.
//!
//! The reconciliation core consumes the provider through two narrow
//! surfaces: a status lookup (used by the polling sweeper) and a webhook
//! signature verifier (used by intake). The provider's actual API shape is
//! hidden behind [`ProviderGateway`].

mod http;
mod verify;

pub use http::HttpGateway;
pub use verify::WebhookVerifier;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::TransactionStatus;

/// Normalized remote payment state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    Succeeded,
    Failed,
    Cancelled,
    Pending,
    /// The provider does not know this transaction.
    NotFound,
}

impl ProviderStatus {
    /// The local terminal status this remote state maps to, if any.
    pub fn terminal_status(&self) -> Option<TransactionStatus> {
        match self {
            Self::Succeeded => Some(TransactionStatus::Completed),
            Self::Failed => Some(TransactionStatus::Failed),
            Self::Cancelled => Some(TransactionStatus::Cancelled),
            Self::Pending | Self::NotFound => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Pending => "pending",
            Self::NotFound => "not_found",
        }
    }

    /// Parse a provider status string (webhook `data.status` or API
    /// response `status`).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "succeeded" | "paid" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "pending" | "processing" | "requires_action" => Some(Self::Pending),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network fault or provider 5xx; safe to retry on a later sweep.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// The provider answered but the response could not be interpreted.
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

/// Remote status lookups against the payment provider.
///
/// Abstracted so the sweeper can run against a simulated provider in tests.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Current state of one payment attempt.
    async fn payment_status(&self, provider_txn_id: &str)
        -> Result<ProviderStatus, GatewayError>;

    /// Current state of a provider-side subscription.
    async fn subscription_status(
        &self,
        provider_sub_id: &str,
    ) -> Result<ProviderStatus, GatewayError>;
}
