//! Webhook ingestion: verified provider callbacks mapped onto the purchase state machine.

use axum::http::HeaderMap;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::AppError;
use crate::payment_providers::WebhookOutcome;
use crate::purchases::{PurchaseRef, PurchaseService};

/// Error code used when the provider reports a failure without one.
pub const DEFAULT_FAILURE_CODE: &str = "payment_failed";

/// What the engine did with a webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WebhookAck {
    #[serde(rename_all = "camelCase")]
    Completed { request_id: Uuid, replayed: bool },
    #[serde(rename_all = "camelCase")]
    Failed { request_id: Uuid },
    #[serde(rename_all = "camelCase")]
    Processing { request_id: Uuid },
    /// The request is in a state the event cannot apply to. Acknowledged so the provider
    /// stops retrying.
    Ignored { reason: String },
}

/// Verifies a webhook and applies it.
///
/// `InvalidState` is acknowledged as [`WebhookAck::Ignored`]; every other error is returned
/// so the caller can answer with a status that makes the provider retry or give up.
pub async fn ingest_webhook(
    service: &PurchaseService,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<WebhookAck, AppError> {
    let webhook = service.provider().verify_webhook(headers, body)?;
    let reference = PurchaseRef::Session(webhook.session_id.clone());

    tracing::info!(
        session_id = %webhook.session_id,
        outcome = ?webhook.outcome,
        provider = %service.provider().name(),
        "Payment webhook received"
    );

    let result = match webhook.outcome {
        WebhookOutcome::Succeeded => {
            let transaction_id = webhook.transaction_id.as_deref().ok_or_else(|| {
                AppError::Validation("Succeeded webhook has no transaction id".to_string())
            })?;
            service
                .complete_purchase(
                    reference,
                    transaction_id,
                    webhook.signature.as_deref(),
                    json!({ "source": "webhook" }),
                )
                .await
                .map(|completion| WebhookAck::Completed {
                    request_id: completion.request.id,
                    replayed: completion.replayed,
                })
        }
        WebhookOutcome::Failed => service
            .fail_purchase(
                reference,
                webhook.error_code.as_deref().unwrap_or(DEFAULT_FAILURE_CODE),
                webhook.error_message.as_deref(),
            )
            .await
            .map(|request| WebhookAck::Failed {
                request_id: request.id,
            }),
        WebhookOutcome::Processing => service
            .mark_processing(reference)
            .await
            .map(|request| WebhookAck::Processing {
                request_id: request.id,
            }),
    };

    match result {
        Err(AppError::InvalidState(reason)) => {
            tracing::warn!(
                session_id = %webhook.session_id,
                reason = %reason,
                "Webhook does not apply to the request's state, acknowledging"
            );
            Ok(WebhookAck::Ignored { reason })
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_serialization() {
        let id = Uuid::nil();
        assert_eq!(
            serde_json::to_value(WebhookAck::Completed {
                request_id: id,
                replayed: true
            })
            .unwrap(),
            json!({"result": "completed", "requestId": id, "replayed": true})
        );
        assert_eq!(
            serde_json::to_value(WebhookAck::Ignored {
                reason: "expired".into()
            })
            .unwrap(),
            json!({"result": "ignored", "reason": "expired"})
        );
    }
}
