//! Milestone evaluation hook-in.
//!
//! The evaluator itself belongs to another service; the engine only tells it that a trigger
//! fired. Calls run inside a savepoint and their failures are logged, never propagated.

use async_trait::async_trait;
use sqlx::PgConnection;

use crate::models::PurchaseRequest;

/// Trigger fired after every completed purchase.
pub const TRIGGER_PURCHASE_COMPLETED: &str = "purchase_completed";

#[async_trait]
pub trait MilestoneEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        conn: &mut PgConnection,
        trigger: &str,
        request: &PurchaseRequest,
    ) -> anyhow::Result<()>;
}

/// Evaluator used when no milestone service is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMilestoneEvaluator;

#[async_trait]
impl MilestoneEvaluator for LoggingMilestoneEvaluator {
    async fn evaluate(
        &self,
        _conn: &mut PgConnection,
        trigger: &str,
        request: &PurchaseRequest,
    ) -> anyhow::Result<()> {
        tracing::info!(
            trigger = %trigger,
            request_id = %request.id,
            user_id = %request.user_id,
            "Milestone trigger fired"
        );
        Ok(())
    }
}
