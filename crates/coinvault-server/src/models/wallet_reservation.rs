//! Wallet reservation model for hold-based consumption flows.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

/// Possible states of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "reservation_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    /// Funds are unavailable but not yet spent.
    Held,
    /// Funds were spent and a ledger entry written.
    Consumed,
    /// Funds were returned to the available balance.
    Released,
}

/// A hold on part of a wallet's balance.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct WalletReservation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub wallet_type: String,
    pub amount: BigDecimal,
    pub status: ReservationStatus,
    pub reason: Option<String>,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
    /// When the reservation was consumed or released.
    pub settled_at: Option<DateTime<Utc>>,
}

pub const WALLET_RESERVATION_COLUMNS: &str =
    "id, user_id, wallet_type, amount, status, reason, meta, created_at, settled_at";

impl WalletReservation {
    pub fn is_held(&self) -> bool {
        self.status == ReservationStatus::Held
    }

    /// Check if the reservation is settled (consumed or released).
    pub fn is_settled(&self) -> bool {
        !self.is_held()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reservation_status_serialization() {
        assert_eq!(
            serde_json::to_string(&ReservationStatus::Held).unwrap(),
            "\"held\""
        );
        assert_eq!(
            serde_json::to_string(&ReservationStatus::Consumed).unwrap(),
            "\"consumed\""
        );
        assert_eq!(
            serde_json::to_string(&ReservationStatus::Released).unwrap(),
            "\"released\""
        );
    }

    #[test]
    fn test_settled_states() {
        let mut reservation = WalletReservation {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            wallet_type: "regular_coin".to_string(),
            amount: BigDecimal::from(10),
            status: ReservationStatus::Held,
            reason: None,
            meta: serde_json::json!({}),
            created_at: Utc::now(),
            settled_at: None,
        };
        assert!(reservation.is_held());
        assert!(!reservation.is_settled());

        reservation.status = ReservationStatus::Released;
        assert!(reservation.is_settled());
    }
}
