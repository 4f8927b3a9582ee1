//! Operator endpoints.

use axum::{
    extract::{Query, State},
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AppState;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct ExpireQuery {
    /// Cut-off; defaults to the current time.
    pub now: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ExpireResponse {
    pub expired: Vec<Uuid>,
    pub count: usize,
}

/// Creates the admin router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/purchases/expire", post(expire_purchases))
        .with_state(state)
}

/// POST /api/v1/admin/purchases/expire
///
/// Runs the expiry sweep immediately.
async fn expire_purchases(
    State(state): State<AppState>,
    Query(query): Query<ExpireQuery>,
) -> Result<Json<ExpireResponse>, AppError> {
    let now = query.now.unwrap_or_else(Utc::now);
    let expired = state.service.expire_pending_requests(now).await?;
    Ok(Json(ExpireResponse {
        count: expired.len(),
        expired,
    }))
}
