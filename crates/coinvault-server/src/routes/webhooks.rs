//! Payment provider webhook endpoint.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};

use super::AppState;
use crate::error::AppError;
use crate::webhooks::{ingest_webhook, WebhookAck};

/// Creates the webhooks router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/payments", post(payment_webhook))
        .with_state(state)
}

/// POST /api/v1/webhooks/payments
///
/// Answers 200 for applied, replayed and inapplicable events. Signature failures answer 401
/// and server-side failures 500 so the provider retries.
async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let ack = ingest_webhook(&state.service, &headers, &body).await?;
    Ok(Json(ack))
}
