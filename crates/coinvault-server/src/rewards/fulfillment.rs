//! Idempotent fulfillment of referral rewards.
//!
//! One `referral_rewards` row exists per `(referral_id, reward_key)`. The row is created
//! lazily, locked before the handler runs, and reaches `fulfilled` at most once. Handler
//! failures are recorded on the row and never escape to the caller.

use serde::Serialize;
use serde_json::json;
use sqlx::{Connection, PgConnection};

use super::{RewardContext, RewardDefinition, RewardRegistry};
use crate::error::AppError;
use crate::models::referral_reward::REFERRAL_REWARD_COLUMNS;
use crate::models::{Referral, ReferralReward, RewardStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "error", rename_all = "snake_case")]
pub enum RewardOutcome {
    Fulfilled,
    AlreadyFulfilled,
    NoHandler,
    HandlerError(String),
}

/// Fulfills every reward registered against `trigger` for `referral`.
pub async fn trigger_rewards(
    registry: &RewardRegistry,
    conn: &mut PgConnection,
    trigger: &str,
    referral: &Referral,
    data: &serde_json::Value,
) -> Result<Vec<(String, RewardOutcome)>, AppError> {
    let definitions = registry.definitions_for(trigger);
    let mut outcomes = Vec::with_capacity(definitions.len());

    for definition in definitions {
        let outcome = fulfill_reward(registry, conn, &definition, referral, data).await?;
        tracing::info!(
            referral_id = %referral.id,
            reward_key = %definition.key,
            trigger = %trigger,
            outcome = ?outcome,
            "Referral reward processed"
        );
        outcomes.push((definition.key, outcome));
    }

    Ok(outcomes)
}

/// Ensures the reward row exists and locks it.
async fn lock_reward_row(
    conn: &mut PgConnection,
    definition: &RewardDefinition,
    referral: &Referral,
) -> Result<ReferralReward, AppError> {
    sqlx::query(
        r#"
        INSERT INTO referral_rewards (referral_id, reward_key, recipient_user_id, status)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (referral_id, reward_key) DO NOTHING
        "#,
    )
    .bind(referral.id)
    .bind(&definition.key)
    .bind(definition.recipient_role.recipient(referral))
    .bind(RewardStatus::Pending)
    .execute(&mut *conn)
    .await?;

    let reward = sqlx::query_as(&format!(
        r#"
        SELECT {REFERRAL_REWARD_COLUMNS}
        FROM referral_rewards
        WHERE referral_id = $1 AND reward_key = $2
        FOR UPDATE
        "#
    ))
    .bind(referral.id)
    .bind(&definition.key)
    .fetch_one(&mut *conn)
    .await?;
    Ok(reward)
}

async fn record_result(
    conn: &mut PgConnection,
    reward: &ReferralReward,
    status: RewardStatus,
    metadata: &serde_json::Value,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE referral_rewards
        SET status = $2,
            metadata = $3,
            fulfilled_at = CASE WHEN $2 = 'fulfilled'::referral_reward_status THEN NOW() ELSE fulfilled_at END,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(reward.id)
    .bind(status)
    .bind(metadata)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Fulfills one reward for `referral`.
///
/// Database errors outside the handler propagate; handler errors are recorded on the row
/// and returned as [`RewardOutcome::HandlerError`].
pub async fn fulfill_reward(
    registry: &RewardRegistry,
    conn: &mut PgConnection,
    definition: &RewardDefinition,
    referral: &Referral,
    data: &serde_json::Value,
) -> Result<RewardOutcome, AppError> {
    let reward = lock_reward_row(conn, definition, referral).await?;
    if reward.is_fulfilled() {
        return Ok(RewardOutcome::AlreadyFulfilled);
    }

    let Some(handler) = registry.handler(&definition.key) else {
        return Ok(RewardOutcome::NoHandler);
    };

    let ctx = RewardContext {
        reward_key: &definition.key,
        trigger: &definition.trigger,
        referral,
        recipient_user_id: reward.recipient_user_id,
        data,
    };

    let mut savepoint = conn.begin().await?;
    match handler.execute(&mut *savepoint, &ctx).await {
        Ok(metadata) => {
            savepoint.commit().await?;
            record_result(conn, &reward, RewardStatus::Fulfilled, &metadata).await?;
            Ok(RewardOutcome::Fulfilled)
        }
        Err(e) => {
            savepoint.rollback().await?;
            let message = format!("{:#}", e);
            tracing::warn!(
                referral_id = %referral.id,
                reward_key = %definition.key,
                error = %message,
                "Reward handler failed"
            );
            record_result(
                conn,
                &reward,
                RewardStatus::Failed,
                &json!({ "error": message }),
            )
            .await?;
            Ok(RewardOutcome::HandlerError(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_serialization() {
        assert_eq!(
            serde_json::to_value(RewardOutcome::AlreadyFulfilled).unwrap(),
            json!({"outcome": "already_fulfilled"})
        );
        assert_eq!(
            serde_json::to_value(RewardOutcome::HandlerError("boom".into())).unwrap(),
            json!({"outcome": "handler_error", "error": "boom"})
        );
    }
}
