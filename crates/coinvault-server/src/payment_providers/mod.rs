//! Payment provider abstraction.
//!
//! The engine talks to exactly one provider, chosen by configuration. A provider creates
//! checkout sessions and turns raw webhook requests into verified, normalized events.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{Config, ProviderKind};
use crate::error::AppError;

pub mod dummy;
pub mod hosted;

/// Creates the configured payment provider.
///
/// Adding a provider means adding a match arm here.
pub fn create_provider(config: &Config) -> Result<Arc<dyn PaymentProvider>> {
    match config.provider_kind()? {
        ProviderKind::Dummy => Ok(Arc::new(dummy::DummyProvider::new())),
        ProviderKind::Hosted => {
            let secret = config.webhook_secret.clone().ok_or_else(|| {
                PaymentError::Configuration(
                    "WEBHOOK_SECRET is required for the hosted payment provider".to_string(),
                )
            })?;
            Ok(Arc::new(hosted::HostedProvider::new(
                config.checkout_base_url.clone(),
                secret,
            )))
        }
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Payment provider API error: {0}")]
    ProviderApi(String),

    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid payment data: {0}")]
    InvalidData(String),

    #[error("Payment provider misconfigured: {0}")]
    Configuration(String),
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::InvalidSignature(msg) => AppError::Unauthorized(msg),
            PaymentError::InvalidData(msg) => AppError::Validation(msg),
            PaymentError::ProviderApi(msg) => AppError::PaymentProvider(msg),
            PaymentError::Configuration(msg) => AppError::Internal(msg),
        }
    }
}

/// Parameters for a checkout session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParams {
    pub purchase_request_id: Uuid,
    /// Amount to charge, after discounts.
    pub amount: BigDecimal,
    pub success_url: String,
    pub cancel_url: String,
    /// Free-form options passed through to the provider.
    pub provider_options: serde_json::Value,
}

/// A created checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub session_id: String,
    pub redirect_url: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookOutcome {
    Succeeded,
    Failed,
    Processing,
}

/// A webhook that passed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedWebhook {
    pub outcome: WebhookOutcome,
    pub session_id: String,
    pub transaction_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    /// Raw signature header, stored on the completed request.
    pub signature: Option<String>,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Name stored in `purchase_requests.payment_provider`.
    fn name(&self) -> &'static str;

    async fn create_session(&self, params: &SessionParams) -> Result<CheckoutSession>;

    /// Verifies a webhook request and normalizes its payload.
    fn verify_webhook(&self, headers: &HeaderMap, body: &[u8]) -> Result<VerifiedWebhook>;
}

/// Adjusts session parameters before the provider sees them. At most one is installed.
#[async_trait]
pub trait SessionEnricher: Send + Sync {
    async fn enrich(
        &self,
        user_id: Uuid,
        wallet_type: &str,
        params: SessionParams,
    ) -> anyhow::Result<SessionParams>;
}

/// Webhook body shared by the bundled providers.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookPayload {
    #[serde(rename = "type")]
    event_type: String,
    session_id: String,
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

pub const EVENT_PAYMENT_SUCCEEDED: &str = "payment.succeeded";
pub const EVENT_PAYMENT_FAILED: &str = "payment.failed";
pub const EVENT_PAYMENT_PROCESSING: &str = "payment.processing";

/// Parses a webhook body into a [`VerifiedWebhook`] without a signature.
fn parse_webhook_payload(body: &[u8]) -> Result<VerifiedWebhook> {
    let payload: WebhookPayload = serde_json::from_slice(body)
        .map_err(|e| PaymentError::InvalidData(format!("Malformed webhook payload: {}", e)))?;

    let outcome = match payload.event_type.as_str() {
        EVENT_PAYMENT_SUCCEEDED => WebhookOutcome::Succeeded,
        EVENT_PAYMENT_FAILED => WebhookOutcome::Failed,
        EVENT_PAYMENT_PROCESSING => WebhookOutcome::Processing,
        other => {
            return Err(PaymentError::InvalidData(format!(
                "Unsupported webhook event type: {}",
                other
            )))
        }
    };

    if payload.session_id.trim().is_empty() {
        return Err(PaymentError::InvalidData(
            "Webhook payload has an empty session id".to_string(),
        ));
    }

    Ok(VerifiedWebhook {
        outcome,
        session_id: payload.session_id,
        transaction_id: payload.transaction_id,
        error_code: payload.error_code,
        error_message: payload.error_message,
        signature: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_succeeded_payload() {
        let body = json!({
            "type": "payment.succeeded",
            "sessionId": "sess_1",
            "transactionId": "t1"
        })
        .to_string();

        let webhook = parse_webhook_payload(body.as_bytes()).unwrap();
        assert_eq!(webhook.outcome, WebhookOutcome::Succeeded);
        assert_eq!(webhook.session_id, "sess_1");
        assert_eq!(webhook.transaction_id.as_deref(), Some("t1"));
        assert!(webhook.signature.is_none());
    }

    #[test]
    fn test_parse_failed_payload() {
        let body = json!({
            "type": "payment.failed",
            "sessionId": "sess_1",
            "errorCode": "card_declined",
            "errorMessage": "Card was declined"
        })
        .to_string();

        let webhook = parse_webhook_payload(body.as_bytes()).unwrap();
        assert_eq!(webhook.outcome, WebhookOutcome::Failed);
        assert_eq!(webhook.error_code.as_deref(), Some("card_declined"));
    }

    #[test]
    fn test_unknown_event_type_is_rejected() {
        let body = json!({"type": "payment.refunded", "sessionId": "sess_1"}).to_string();
        assert!(matches!(
            parse_webhook_payload(body.as_bytes()),
            Err(PaymentError::InvalidData(_))
        ));
    }

    #[test]
    fn test_malformed_payload_is_rejected() {
        assert!(parse_webhook_payload(b"not json").is_err());
        let body = json!({"type": "payment.succeeded", "sessionId": " "}).to_string();
        assert!(parse_webhook_payload(body.as_bytes()).is_err());
    }

    #[test]
    fn test_error_conversion() {
        assert!(matches!(
            AppError::from(PaymentError::InvalidSignature("bad".into())),
            AppError::Unauthorized(_)
        ));
        assert!(matches!(
            AppError::from(PaymentError::ProviderApi("down".into())),
            AppError::PaymentProvider(_)
        ));
        assert!(matches!(
            AppError::from(PaymentError::InvalidData("bad".into())),
            AppError::Validation(_)
        ));
    }
}
