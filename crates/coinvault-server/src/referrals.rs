//! Referral rows: who invited whom.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::referral::REFERRAL_COLUMNS;
use crate::models::Referral;

/// Returns the referral that brought `invitee_user_id` in, if any.
pub async fn find_by_invitee(
    conn: &mut PgConnection,
    invitee_user_id: Uuid,
) -> Result<Option<Referral>, AppError> {
    let referral = sqlx::query_as(&format!(
        "SELECT {REFERRAL_COLUMNS} FROM referrals WHERE invitee_user_id = $1"
    ))
    .bind(invitee_user_id)
    .fetch_optional(conn)
    .await?;
    Ok(referral)
}

/// Records a referral.
///
/// Returns `None` when the invitee already has one; the existing row is left untouched.
pub async fn create_referral(
    conn: &mut PgConnection,
    inviter_user_id: Uuid,
    invitee_user_id: Uuid,
    coupon_id: Option<Uuid>,
) -> Result<Option<Referral>, AppError> {
    if inviter_user_id == invitee_user_id {
        return Err(AppError::Validation(
            "A user cannot refer themselves".to_string(),
        ));
    }

    let referral = sqlx::query_as(&format!(
        r#"
        INSERT INTO referrals (inviter_user_id, invitee_user_id, coupon_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (invitee_user_id) DO NOTHING
        RETURNING {REFERRAL_COLUMNS}
        "#
    ))
    .bind(inviter_user_id)
    .bind(invitee_user_id)
    .bind(coupon_id)
    .fetch_optional(conn)
    .await?;
    Ok(referral)
}
