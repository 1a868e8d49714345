use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{CheckoutGateway, CheckoutRequest, CheckoutSession, GatewayError};

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

const REQUEST_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Creates Stripe Checkout sessions over the REST API.
pub struct StripeGateway {
    client: reqwest::Client,
    secret_key: String,
    api_base: String,
}

impl StripeGateway {
    pub fn new(secret_key: impl Into<String>, api_base: impl Into<String>) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            secret_key: secret_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    fn form(request: &CheckoutRequest) -> Vec<(&'static str, String)> {
        vec![
            ("mode", "payment".to_string()),
            ("customer_email", request.customer_email.clone()),
            ("line_items[0][quantity]", "1".to_string()),
            (
                "line_items[0][price_data][currency]",
                request.currency.to_ascii_lowercase(),
            ),
            (
                "line_items[0][price_data][unit_amount]",
                request.amount_minor.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]",
                request.product_name.clone(),
            ),
            (
                "line_items[0][price_data][product_data][description]",
                request.description.clone(),
            ),
            ("success_url", request.success_url.clone()),
            ("cancel_url", request.cancel_url.clone()),
            ("metadata[eventId]", request.event_id.to_string()),
            ("metadata[registrationId]", request.registration_id.to_string()),
            ("metadata[userId]", request.user_id.to_string()),
        ]
    }
}

#[async_trait]
impl CheckoutGateway for StripeGateway {
    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            // Retries for the same registration reuse the same session.
            .header("Idempotency-Key", request.registration_id.to_string())
            .form(&Self::form(request))
            .send()
            .await
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorResponse>()
                .await
                .ok()
                .and_then(|body| body.error.message)
                .unwrap_or_else(|| "no error message".to_string());
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;
        let url = session
            .url
            .ok_or_else(|| GatewayError::Malformed(format!("session {} has no url", session.id)))?;

        tracing::info!(
            session_id = %session.id,
            registration_id = %request.registration_id,
            "Checkout session created"
        );

        Ok(CheckoutSession {
            id: session.id,
            url,
        })
    }
}
