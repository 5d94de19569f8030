use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::{GatewayError, ProviderGateway, ProviderStatus};

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
}

/// HTTP gateway to the payment provider's REST API.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    secret_key: String,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            secret_key: secret_key.into(),
        }
    }

    async fn fetch_status(&self, path: &str) -> Result<ProviderStatus, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| GatewayError::Transient(format!("request failed: {}", e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Ok(ProviderStatus::NotFound),
            s if s.is_server_error() => {
                return Err(GatewayError::Transient(format!("provider returned {}", s)));
            }
            s if !s.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(GatewayError::Malformed(format!(
                    "provider returned {}: {}",
                    s, body
                )));
            }
            _ => {}
        }

        let parsed: StatusResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Malformed(format!("invalid status body: {}", e)))?;

        ProviderStatus::parse(&parsed.status).ok_or_else(|| {
            GatewayError::Malformed(format!("unknown provider status: {}", parsed.status))
        })
    }
}

#[async_trait]
impl ProviderGateway for HttpGateway {
    async fn payment_status(
        &self,
        provider_txn_id: &str,
    ) -> Result<ProviderStatus, GatewayError> {
        self.fetch_status(&format!("/v1/payments/{}", provider_txn_id)).await
    }

    async fn subscription_status(
        &self,
        provider_sub_id: &str,
    ) -> Result<ProviderStatus, GatewayError> {
        self.fetch_status(&format!("/v1/subscriptions/{}", provider_sub_id)).await
    }
}
