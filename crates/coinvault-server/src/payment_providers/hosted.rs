//! Hosted checkout provider with HMAC-signed webhooks.
//!
//! The checkout page lives at `{checkout_base_url}/{session_id}`. Webhooks carry a
//! `t=<unix>,v1=<hex>` signature header over `"{t}.{body}"`.

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::Utc;
use coinvault_crypto::{verify_webhook_signature, DEFAULT_TOLERANCE_SECS};
use uuid::Uuid;

use super::{
    parse_webhook_payload, CheckoutSession, PaymentError, PaymentProvider, Result, SessionParams,
    VerifiedWebhook,
};

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "x-coinvault-signature";

#[derive(Clone)]
pub struct HostedProvider {
    checkout_base_url: String,
    webhook_secret: String,
    tolerance_secs: i64,
}

impl std::fmt::Debug for HostedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostedProvider")
            .field("checkout_base_url", &self.checkout_base_url)
            .field("tolerance_secs", &self.tolerance_secs)
            .finish_non_exhaustive()
    }
}

impl HostedProvider {
    pub fn new(checkout_base_url: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            checkout_base_url: checkout_base_url.into(),
            webhook_secret: webhook_secret.into(),
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    pub fn with_tolerance(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }
}

#[async_trait]
impl PaymentProvider for HostedProvider {
    fn name(&self) -> &'static str {
        "hosted"
    }

    async fn create_session(&self, params: &SessionParams) -> Result<CheckoutSession> {
        if params.amount <= bigdecimal::BigDecimal::from(0) {
            return Err(PaymentError::InvalidData(
                "Checkout amount must be positive".to_string(),
            ));
        }

        let session_id = format!("cs_{}", Uuid::new_v4().simple());
        let redirect_url = format!(
            "{}/{}",
            self.checkout_base_url.trim_end_matches('/'),
            session_id
        );

        tracing::info!(
            request_id = %params.purchase_request_id,
            session_id = %session_id,
            "Hosted checkout session created"
        );

        Ok(CheckoutSession {
            session_id,
            redirect_url,
            expires_at: None,
        })
    }

    fn verify_webhook(&self, headers: &HeaderMap, body: &[u8]) -> Result<VerifiedWebhook> {
        let header = headers
            .get(SIGNATURE_HEADER)
            .ok_or_else(|| PaymentError::InvalidSignature("Missing signature header".to_string()))?
            .to_str()
            .map_err(|_| PaymentError::InvalidSignature("Unreadable signature header".to_string()))?;

        let now = Utc::now().timestamp();
        if !verify_webhook_signature(
            self.webhook_secret.as_bytes(),
            header,
            body,
            now,
            self.tolerance_secs,
        ) {
            return Err(PaymentError::InvalidSignature(
                "Signature does not match payload".to_string(),
            ));
        }

        let mut webhook = parse_webhook_payload(body)?;
        webhook.signature = Some(header.to_string());
        Ok(webhook)
    }
}
