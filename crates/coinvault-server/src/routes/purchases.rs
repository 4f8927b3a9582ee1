//! Purchase endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use super::AppState;
use crate::error::AppError;
use crate::models::PurchaseRequest;
use crate::purchases::InitiatePurchase;

/// Creates the purchases router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(create_purchase))
        .route("/{id}", get(get_purchase))
        .with_state(state)
}

/// POST /api/v1/purchases
///
/// Returns 201 for a new request and 200 when an identical submission is replayed.
async fn create_purchase(
    State(state): State<AppState>,
    Json(body): Json<InitiatePurchase>,
) -> Result<(StatusCode, Json<PurchaseRequest>), AppError> {
    let initiation = state.service.initiate_purchase(body).await?;
    let status = if initiation.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(initiation.request)))
}

/// GET /api/v1/purchases/{id}
async fn get_purchase(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PurchaseRequest>, AppError> {
    let request = state.service.get_purchase(id).await?;
    Ok(Json(request))
}
