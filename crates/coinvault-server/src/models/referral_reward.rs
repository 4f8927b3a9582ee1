//! Referral reward model: one row per `(referral_id, reward_key)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "referral_reward_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RewardStatus {
    /// Created, handler not yet run (or no handler registered).
    Pending,
    /// Handler succeeded. Never left again.
    Fulfilled,
    /// Handler failed; may be retried by a later trigger.
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReferralReward {
    pub id: Uuid,
    pub referral_id: Uuid,
    pub reward_key: String,
    pub recipient_user_id: Uuid,
    pub status: RewardStatus,
    /// Handler output on success, `{"error": ...}` on failure.
    pub metadata: serde_json::Value,
    pub fulfilled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const REFERRAL_REWARD_COLUMNS: &str = "id, referral_id, reward_key, recipient_user_id, \
    status, metadata, fulfilled_at, created_at, updated_at";

impl ReferralReward {
    pub fn is_fulfilled(&self) -> bool {
        self.status == RewardStatus::Fulfilled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reward_status_serialization() {
        assert_eq!(
            serde_json::to_string(&RewardStatus::Pending).unwrap(),
            "\"pending\""
        );
        assert_eq!(
            serde_json::to_string(&RewardStatus::Fulfilled).unwrap(),
            "\"fulfilled\""
        );
        assert_eq!(
            serde_json::from_str::<RewardStatus>("\"failed\"").unwrap(),
            RewardStatus::Failed
        );
    }
}
