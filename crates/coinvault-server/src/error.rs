//! Error types for the CoinVault server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Application error type, shared by the purchase engine and the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad input. Never retried.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Idempotency key reused with a different payload.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Operation against a request that is not in an eligible state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Payment provider error: {0}")]
    PaymentProvider(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the HTTP status used when this error reaches a client.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Database(_) | AppError::Internal(_) | AppError::PaymentProvider(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) | AppError::InvalidState(_) => StatusCode::CONFLICT,
            AppError::InsufficientFunds(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }

    /// Short machine-readable code persisted on failed requests and logged.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::NotFound(_) => "not_found",
            AppError::Validation(_) => "validation_error",
            AppError::Conflict(_) => "conflict",
            AppError::InvalidState(_) => "invalid_state",
            AppError::InsufficientFunds(_) => "insufficient_funds",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::PaymentProvider(_) => "payment_provider_error",
            AppError::Internal(_) => "internal_error",
        }
    }
}

/// Returns true if `err` is a unique-constraint violation on `constraint`.
pub fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation() && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (status, "Internal server error").into_response()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (status, "Internal server error").into_response()
            }
            AppError::PaymentProvider(msg) => {
                tracing::error!("Payment provider error: {}", msg);
                (status, "Payment provider unavailable").into_response()
            }
            AppError::NotFound(msg)
            | AppError::Validation(msg)
            | AppError::Conflict(msg)
            | AppError::InvalidState(msg)
            | AppError::InsufficientFunds(msg)
            | AppError::Unauthorized(msg) => (status, msg).into_response(),
        }
    }
}
