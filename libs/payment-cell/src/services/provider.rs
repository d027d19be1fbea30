// libs/payment-cell/src/services/provider.rs
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, error};

use shared_config::AppConfig;

use crate::models::{ProviderPayment, WebhookError};

/// Client for the payment provider's payments API. The webhook body is only a
/// hint; this is where the authoritative status comes from. The timeout is
/// bounded so a hung provider turns into a retryable failure instead of a
/// stuck delivery.
pub struct PaymentProviderClient {
    client: Client,
    base_url: String,
    api_token: String,
}

impl PaymentProviderClient {
    pub fn new(config: &AppConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.payment_api_timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: config.payment_api_base_url.clone(),
            api_token: config.payment_api_token.clone(),
        }
    }

    pub async fn fetch_payment(&self, payment_id: &str) -> Result<ProviderPayment, WebhookError> {
        let url = format!(
            "{}/v1/payments/{}",
            self.base_url,
            urlencoding::encode(payment_id)
        );
        debug!("fetching payment truth from {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| {
                error!("provider fetch failed: {}", e);
                WebhookError::Upstream(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("provider returned {}: {}", status, body);
            return Err(WebhookError::Upstream(format!(
                "provider returned {}",
                status
            )));
        }

        response
            .json::<ProviderPayment>()
            .await
            .map_err(|e| WebhookError::Upstream(format!("unparseable provider response: {}", e)))
    }
}
