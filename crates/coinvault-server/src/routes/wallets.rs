//! Wallet balance and ledger history endpoints.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AppState;
use crate::error::AppError;
use crate::models::{Wallet, WalletHistory};

const DEFAULT_HISTORY_LIMIT: i64 = 50;
const MAX_HISTORY_LIMIT: i64 = 200;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletResponse {
    pub user_id: Uuid,
    pub wallet_type: String,
    pub balance: BigDecimal,
    pub reserved: BigDecimal,
    pub available: BigDecimal,
}

impl From<Wallet> for WalletResponse {
    fn from(wallet: Wallet) -> Self {
        let available = wallet.available();
        Self {
            user_id: wallet.user_id,
            wallet_type: wallet.wallet_type,
            balance: wallet.balance,
            reserved: wallet.reserved,
            available,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub items: Vec<WalletHistory>,
    pub limit: i64,
    pub offset: i64,
}

/// Creates the wallets router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/{user_id}/{wallet_type}", get(get_wallet))
        .route("/{user_id}/{wallet_type}/history", get(get_history))
        .with_state(state)
}

/// GET /api/v1/wallets/{user_id}/{wallet_type}
async fn get_wallet(
    State(state): State<AppState>,
    Path((user_id, wallet_type)): Path<(Uuid, String)>,
) -> Result<Json<WalletResponse>, AppError> {
    let wallet = state.service.get_wallet(user_id, &wallet_type).await?;
    Ok(Json(wallet.into()))
}

/// GET /api/v1/wallets/{user_id}/{wallet_type}/history
async fn get_history(
    State(state): State<AppState>,
    Path((user_id, wallet_type)): Path<(Uuid, String)>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let offset = query.offset.unwrap_or(0).max(0);

    let items = state
        .service
        .list_history(user_id, &wallet_type, limit, offset)
        .await?;

    Ok(Json(HistoryResponse {
        items,
        limit,
        offset,
    }))
}
