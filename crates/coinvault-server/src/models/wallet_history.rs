//! Wallet history model: the append-only ledger behind every balance.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// `source_type` for credits coming from a completed purchase.
pub const SOURCE_PURCHASE: &str = "purchase";
/// `source_type` for referral reward payouts.
pub const SOURCE_REFERRAL_REWARD: &str = "referral_reward";
/// `source_type` for converted reservations.
pub const SOURCE_RESERVATION: &str = "reservation";

/// `change_method` for provider-confirmed payments.
pub const CHANGE_PAYMENT: &str = "payment";
/// `change_method` for rewards granted by the system.
pub const CHANGE_REWARD: &str = "reward";
/// `change_method` for consumption of held funds.
pub const CHANGE_CONSUME: &str = "consume";

/// Immutable ledger row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct WalletHistory {
    pub id: Uuid,
    pub user_id: Uuid,
    pub wallet_type: String,
    /// Signed change applied to the balance.
    pub amount: BigDecimal,
    /// Balance right after this entry was applied.
    pub balance_after: BigDecimal,
    pub change_method: String,
    pub source_type: String,
    /// Correlates the entry with the purchase request (or other batch) that caused it.
    pub request_batch_id: Option<Uuid>,
    pub reason: Option<String>,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

pub const WALLET_HISTORY_COLUMNS: &str = "id, user_id, wallet_type, amount, balance_after, \
    change_method, source_type, request_batch_id, reason, meta, created_at";

impl WalletHistory {
    pub fn is_credit(&self) -> bool {
        self.amount > BigDecimal::from(0)
    }

    pub fn is_debit(&self) -> bool {
        self.amount < BigDecimal::from(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_credit_and_debit() {
        let mut entry = WalletHistory {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            wallet_type: "regular_coin".to_string(),
            amount: BigDecimal::from(1000),
            balance_after: BigDecimal::from(1000),
            change_method: CHANGE_PAYMENT.to_string(),
            source_type: SOURCE_PURCHASE.to_string(),
            request_batch_id: Some(Uuid::new_v4()),
            reason: None,
            meta: json!({}),
            created_at: Utc::now(),
        };
        assert!(entry.is_credit());
        assert!(!entry.is_debit());

        entry.amount = BigDecimal::from(-5);
        assert!(entry.is_debit());
    }

    #[test]
    fn test_serialization_uses_camel_case() {
        let entry = WalletHistory {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            wallet_type: "regular_coin".to_string(),
            amount: BigDecimal::from(10),
            balance_after: BigDecimal::from(10),
            change_method: CHANGE_REWARD.to_string(),
            source_type: SOURCE_REFERRAL_REWARD.to_string(),
            request_batch_id: None,
            reason: Some("referral_inviter_bonus".to_string()),
            meta: json!({"rewardKey": "referral_inviter_bonus"}),
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["sourceType"], "referral_reward");
        assert_eq!(value["changeMethod"], "reward");
        assert!(value["requestBatchId"].is_null());
    }
}
