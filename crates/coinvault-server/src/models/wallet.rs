//! Wallet model holding a user's balance for one wallet type.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Represents the balance of one `(user_id, wallet_type)` pair.
///
/// Rows are only ever changed through the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub wallet_type: String,
    /// Sum of every ledger entry for this wallet.
    pub balance: BigDecimal,
    /// Amount held by active reservations.
    pub reserved: BigDecimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Returns the balance not held by reservations.
    pub fn available(&self) -> BigDecimal {
        &self.balance - &self.reserved
    }

    /// Returns true if the wallet can cover `amount` from its available balance.
    pub fn has_sufficient_balance(&self, amount: &BigDecimal) -> bool {
        &self.available() >= amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn wallet(balance: &str, reserved: &str) -> Wallet {
        Wallet {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            wallet_type: "regular_coin".to_string(),
            balance: BigDecimal::from_str(balance).unwrap(),
            reserved: BigDecimal::from_str(reserved).unwrap(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_available_excludes_reserved() {
        let wallet = wallet("100.00", "25.50");
        assert_eq!(wallet.available(), BigDecimal::from_str("74.50").unwrap());
    }

    #[test]
    fn test_has_sufficient_balance() {
        let wallet = wallet("100.00", "40.00");
        assert!(wallet.has_sufficient_balance(&BigDecimal::from_str("60.00").unwrap()));
        assert!(!wallet.has_sufficient_balance(&BigDecimal::from_str("60.01").unwrap()));
    }
}
