//! Dummy payment provider for local development.
//!
//! Sessions are created locally and webhooks are accepted unsigned. Never enable it in
//! production.

use async_trait::async_trait;
use axum::http::HeaderMap;
use uuid::Uuid;

use super::{parse_webhook_payload, CheckoutSession, PaymentProvider, Result, SessionParams, VerifiedWebhook};

/// Placeholder replaced with the session id in the success URL.
pub const SESSION_ID_PLACEHOLDER: &str = "{CHECKOUT_SESSION_ID}";

#[derive(Debug, Default, Clone, Copy)]
pub struct DummyProvider;

impl DummyProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PaymentProvider for DummyProvider {
    fn name(&self) -> &'static str {
        "dummy"
    }

    async fn create_session(&self, params: &SessionParams) -> Result<CheckoutSession> {
        let session_id = format!("dummy_session_{}", Uuid::new_v4().simple());
        let redirect_url = params
            .success_url
            .replace(SESSION_ID_PLACEHOLDER, &session_id);

        tracing::info!(
            request_id = %params.purchase_request_id,
            session_id = %session_id,
            amount = %params.amount,
            "Dummy provider created checkout session"
        );

        Ok(CheckoutSession {
            session_id,
            redirect_url,
            expires_at: None,
        })
    }

    fn verify_webhook(&self, _headers: &HeaderMap, body: &[u8]) -> Result<VerifiedWebhook> {
        parse_webhook_payload(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use serde_json::json;

    fn params(success_url: &str) -> SessionParams {
        SessionParams {
            purchase_request_id: Uuid::new_v4(),
            amount: BigDecimal::from(1000),
            success_url: success_url.to_string(),
            cancel_url: "http://localhost/cancel".to_string(),
            provider_options: json!({}),
        }
    }

    #[tokio::test]
    async fn test_create_session_fills_placeholder() {
        let provider = DummyProvider::new();
        let session = provider
            .create_session(&params(
                "http://localhost/success?session_id={CHECKOUT_SESSION_ID}",
            ))
            .await
            .unwrap();

        assert!(session.session_id.starts_with("dummy_session_"));
        assert_eq!(
            session.redirect_url,
            format!("http://localhost/success?session_id={}", session.session_id)
        );
    }

    #[tokio::test]
    async fn test_sessions_are_unique() {
        let provider = DummyProvider::new();
        let a = provider.create_session(&params("http://x")).await.unwrap();
        let b = provider.create_session(&params("http://x")).await.unwrap();
        assert_ne!(a.session_id, b.session_id);
    }

    #[test]
    fn test_accepts_unsigned_webhook() {
        let provider = DummyProvider::new();
        let body = json!({
            "type": "payment.succeeded",
            "sessionId": "dummy_session_1",
            "transactionId": "t1"
        })
        .to_string();

        let webhook = provider
            .verify_webhook(&HeaderMap::new(), body.as_bytes())
            .unwrap();
        assert_eq!(webhook.session_id, "dummy_session_1");
        assert!(webhook.signature.is_none());
    }
}
