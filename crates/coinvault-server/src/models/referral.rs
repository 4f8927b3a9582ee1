//! Referral model linking an invitee to the user who invited them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One row per invitee; a user can be invited at most once.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Referral {
    pub id: Uuid,
    pub inviter_user_id: Uuid,
    pub invitee_user_id: Uuid,
    /// Coupon the invitee redeemed.
    pub coupon_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

pub const REFERRAL_COLUMNS: &str = "id, inviter_user_id, invitee_user_id, coupon_id, created_at";
