//! API routes for the CoinVault server.

pub mod admin;
pub mod coupons;
pub mod purchases;
pub mod wallets;
pub mod webhooks;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::purchases::PurchaseService;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: PurchaseService,
}

/// Creates the main API router with all routes mounted.
pub fn create_router(service: PurchaseService) -> Router {
    let state = AppState { service };
    Router::new()
        .nest("/api/v1", api_v1_routes(state))
        .layer(TraceLayer::new_for_http())
}

/// Creates the v1 API routes.
fn api_v1_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/purchases", purchases::router(state.clone()))
        .nest("/webhooks", webhooks::router(state.clone()))
        .nest("/wallets", wallets::router(state.clone()))
        .nest("/coupons", coupons::router(state.clone()))
        .nest("/admin", admin::router(state))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
