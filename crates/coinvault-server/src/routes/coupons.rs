//! Coupon preview endpoint.

use axum::{extract::State, routing::post, Json, Router};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use uuid::Uuid;

use super::AppState;
use crate::coupons::CouponPreview;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewCouponRequest {
    pub user_id: Uuid,
    pub code: String,
    pub payment_amount: BigDecimal,
}

/// Creates the coupons router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/preview", post(preview_coupon))
        .with_state(state)
}

/// POST /api/v1/coupons/preview
///
/// Invalid coupons are reported in the body with `valid: false`, not as an error status.
async fn preview_coupon(
    State(state): State<AppState>,
    Json(body): Json<PreviewCouponRequest>,
) -> Result<Json<CouponPreview>, AppError> {
    if body.payment_amount <= BigDecimal::from(0) {
        return Err(AppError::Validation(
            "Payment amount must be positive".to_string(),
        ));
    }
    let preview = state
        .service
        .preview_coupon(body.user_id, &body.code, &body.payment_amount)
        .await?;
    Ok(Json(preview))
}
