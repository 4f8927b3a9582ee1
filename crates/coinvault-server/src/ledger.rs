//! Wallet ledger: the only code path allowed to change a wallet balance.
//!
//! Every method runs on the caller's connection, normally a transaction owned by the
//! purchase engine, and never opens or commits a transaction of its own. A balance change
//! is always a delta `UPDATE` on the wallet row followed by an `INSERT` into
//! `wallet_history` on the same connection, so the running sum of the history always equals
//! the balance even with concurrent adjustments to the same wallet.

use bigdecimal::BigDecimal;
use serde_json::json;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::wallet_history::{SOURCE_RESERVATION, WALLET_HISTORY_COLUMNS};
use crate::models::wallet_reservation::WALLET_RESERVATION_COLUMNS;
use crate::models::{ReservationStatus, Wallet, WalletHistory, WalletReservation};

const WALLET_COLUMNS: &str = "id, user_id, wallet_type, balance, reserved, created_at, updated_at";

/// A signed balance change to apply to one wallet.
#[derive(Debug, Clone)]
pub struct BalanceChange {
    pub user_id: Uuid,
    pub wallet_type: String,
    pub amount: BigDecimal,
    pub change_method: String,
    pub source_type: String,
    pub request_batch_id: Option<Uuid>,
    pub reason: Option<String>,
    pub meta: serde_json::Value,
}

impl BalanceChange {
    pub fn new(
        user_id: Uuid,
        wallet_type: impl Into<String>,
        amount: BigDecimal,
        change_method: impl Into<String>,
        source_type: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            wallet_type: wallet_type.into(),
            amount,
            change_method: change_method.into(),
            source_type: source_type.into(),
            request_batch_id: None,
            reason: None,
            meta: json!({}),
        }
    }

    pub fn with_batch(mut self, request_batch_id: Uuid) -> Self {
        self.request_batch_id = Some(request_batch_id);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = meta;
        self
    }

    /// Checks the change before it touches the database.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.wallet_type.trim().is_empty() {
            return Err(AppError::Validation("Wallet type is required".to_string()));
        }
        if self.amount == BigDecimal::from(0) {
            return Err(AppError::Validation(
                "Balance change amount must be non-zero".to_string(),
            ));
        }
        if self.change_method.trim().is_empty() || self.source_type.trim().is_empty() {
            return Err(AppError::Validation(
                "Balance change requires a change method and source type".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of a balance change: the wallet after the change and the ledger row written.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub wallet: Wallet,
    pub history: WalletHistory,
}

/// How a consumed reservation is recorded in the ledger.
#[derive(Debug, Clone)]
pub struct ReservationConsumption {
    pub change_method: String,
    pub source_type: String,
    pub request_batch_id: Option<Uuid>,
    pub reason: Option<String>,
    pub meta: serde_json::Value,
}

impl ReservationConsumption {
    pub fn new(change_method: impl Into<String>) -> Self {
        Self {
            change_method: change_method.into(),
            source_type: SOURCE_RESERVATION.to_string(),
            request_batch_id: None,
            reason: None,
            meta: json!({}),
        }
    }
}

/// Ledger operations bound to one connection.
pub struct Ledger<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Ledger<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Creates the wallet row with a zero balance if it does not exist yet.
    async fn ensure_wallet(&mut self, user_id: Uuid, wallet_type: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO wallets (user_id, wallet_type)
            VALUES ($1, $2)
            ON CONFLICT (user_id, wallet_type) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(wallet_type)
        .execute(&mut *self.db)
        .await?;
        Ok(())
    }

    async fn insert_history(
        &mut self,
        change: &BalanceChange,
        balance_after: &BigDecimal,
    ) -> Result<WalletHistory, AppError> {
        let history: WalletHistory = sqlx::query_as(&format!(
            r#"
            INSERT INTO wallet_history
                (user_id, wallet_type, amount, balance_after, change_method, source_type,
                 request_batch_id, reason, meta)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {WALLET_HISTORY_COLUMNS}
            "#
        ))
        .bind(change.user_id)
        .bind(&change.wallet_type)
        .bind(&change.amount)
        .bind(balance_after)
        .bind(&change.change_method)
        .bind(&change.source_type)
        .bind(change.request_batch_id)
        .bind(&change.reason)
        .bind(&change.meta)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(history)
    }

    /// Applies a signed change to a wallet and appends the matching history row.
    ///
    /// Fails with `InsufficientFunds` if the available balance would go negative.
    pub async fn adjust_balance(&mut self, change: &BalanceChange) -> Result<LedgerEntry, AppError> {
        change.validate()?;
        self.ensure_wallet(change.user_id, &change.wallet_type).await?;

        // The row lock taken by this UPDATE serializes concurrent changes to the wallet;
        // the guard is re-evaluated against the latest committed balance.
        let wallet: Option<Wallet> = sqlx::query_as(&format!(
            r#"
            UPDATE wallets
            SET balance = balance + $3, updated_at = NOW()
            WHERE user_id = $1 AND wallet_type = $2 AND balance - reserved + $3 >= 0
            RETURNING {WALLET_COLUMNS}
            "#
        ))
        .bind(change.user_id)
        .bind(&change.wallet_type)
        .bind(&change.amount)
        .fetch_optional(&mut *self.db)
        .await?;

        let wallet = wallet.ok_or_else(|| {
            AppError::InsufficientFunds(format!(
                "Wallet {} of user {} cannot cover {}",
                change.wallet_type, change.user_id, change.amount
            ))
        })?;

        let history = self.insert_history(change, &wallet.balance).await?;

        tracing::debug!(
            user_id = %change.user_id,
            wallet_type = %change.wallet_type,
            amount = %change.amount,
            balance_after = %wallet.balance,
            source_type = %change.source_type,
            "Wallet balance adjusted"
        );

        Ok(LedgerEntry { wallet, history })
    }

    /// Holds `amount` of the available balance without writing a ledger entry.
    pub async fn reserve(
        &mut self,
        user_id: Uuid,
        wallet_type: &str,
        amount: &BigDecimal,
        reason: Option<&str>,
        meta: serde_json::Value,
    ) -> Result<WalletReservation, AppError> {
        if amount <= &BigDecimal::from(0) {
            return Err(AppError::Validation(
                "Reservation amount must be positive".to_string(),
            ));
        }

        let updated = sqlx::query(
            r#"
            UPDATE wallets
            SET reserved = reserved + $3, updated_at = NOW()
            WHERE user_id = $1 AND wallet_type = $2 AND balance - reserved >= $3
            "#,
        )
        .bind(user_id)
        .bind(wallet_type)
        .bind(amount)
        .execute(&mut *self.db)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(AppError::InsufficientFunds(format!(
                "Wallet {} of user {} cannot reserve {}",
                wallet_type, user_id, amount
            )));
        }

        let reservation: WalletReservation = sqlx::query_as(&format!(
            r#"
            INSERT INTO wallet_reservations (user_id, wallet_type, amount, status, reason, meta)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {WALLET_RESERVATION_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(wallet_type)
        .bind(amount)
        .bind(ReservationStatus::Held)
        .bind(reason)
        .bind(&meta)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(reservation)
    }

    /// Locks a reservation and checks it is still held.
    async fn lock_held_reservation(
        &mut self,
        reservation_id: Uuid,
    ) -> Result<WalletReservation, AppError> {
        let reservation: WalletReservation = sqlx::query_as(&format!(
            "SELECT {WALLET_RESERVATION_COLUMNS} FROM wallet_reservations WHERE id = $1 FOR UPDATE"
        ))
        .bind(reservation_id)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Reservation not found: {}", reservation_id)))?;

        if !reservation.is_held() {
            return Err(AppError::InvalidState(format!(
                "Reservation {} is already settled ({:?})",
                reservation_id, reservation.status
            )));
        }

        Ok(reservation)
    }

    async fn settle_reservation(
        &mut self,
        reservation_id: Uuid,
        status: ReservationStatus,
    ) -> Result<WalletReservation, AppError> {
        let reservation: WalletReservation = sqlx::query_as(&format!(
            r#"
            UPDATE wallet_reservations
            SET status = $2, settled_at = NOW()
            WHERE id = $1
            RETURNING {WALLET_RESERVATION_COLUMNS}
            "#
        ))
        .bind(reservation_id)
        .bind(status)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(reservation)
    }

    /// Returns a held reservation to the available balance.
    pub async fn release(&mut self, reservation_id: Uuid) -> Result<WalletReservation, AppError> {
        let reservation = self.lock_held_reservation(reservation_id).await?;

        sqlx::query(
            r#"
            UPDATE wallets
            SET reserved = reserved - $3, updated_at = NOW()
            WHERE user_id = $1 AND wallet_type = $2
            "#,
        )
        .bind(reservation.user_id)
        .bind(&reservation.wallet_type)
        .bind(&reservation.amount)
        .execute(&mut *self.db)
        .await?;

        self.settle_reservation(reservation_id, ReservationStatus::Released)
            .await
    }

    /// Turns a held reservation into a permanent debit in the ledger.
    pub async fn consume_reservation(
        &mut self,
        reservation_id: Uuid,
        consumption: &ReservationConsumption,
    ) -> Result<(WalletReservation, LedgerEntry), AppError> {
        let reservation = self.lock_held_reservation(reservation_id).await?;

        let wallet: Wallet = sqlx::query_as(&format!(
            r#"
            UPDATE wallets
            SET reserved = reserved - $3, balance = balance - $3, updated_at = NOW()
            WHERE user_id = $1 AND wallet_type = $2
            RETURNING {WALLET_COLUMNS}
            "#
        ))
        .bind(reservation.user_id)
        .bind(&reservation.wallet_type)
        .bind(&reservation.amount)
        .fetch_one(&mut *self.db)
        .await?;

        let mut meta = consumption.meta.clone();
        if let Some(object) = meta.as_object_mut() {
            object.insert("reservationId".to_string(), json!(reservation.id));
        }

        let change = BalanceChange {
            user_id: reservation.user_id,
            wallet_type: reservation.wallet_type.clone(),
            amount: -reservation.amount.clone(),
            change_method: consumption.change_method.clone(),
            source_type: consumption.source_type.clone(),
            request_batch_id: consumption.request_batch_id,
            reason: consumption.reason.clone().or_else(|| reservation.reason.clone()),
            meta,
        };
        let history = self.insert_history(&change, &wallet.balance).await?;

        let reservation = self
            .settle_reservation(reservation_id, ReservationStatus::Consumed)
            .await?;

        Ok((reservation, LedgerEntry { wallet, history }))
    }

    pub async fn get_wallet(
        &mut self,
        user_id: Uuid,
        wallet_type: &str,
    ) -> Result<Option<Wallet>, AppError> {
        let wallet = sqlx::query_as(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1 AND wallet_type = $2"
        ))
        .bind(user_id)
        .bind(wallet_type)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(wallet)
    }

    /// Lists ledger rows for a wallet, newest first.
    pub async fn list_history(
        &mut self,
        user_id: Uuid,
        wallet_type: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WalletHistory>, AppError> {
        let rows = sqlx::query_as(&format!(
            r#"
            SELECT {WALLET_HISTORY_COLUMNS}
            FROM wallet_history
            WHERE user_id = $1 AND wallet_type = $2
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(user_id)
        .bind(wallet_type)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(rows)
    }

    /// Sum of every ledger row for a wallet. Equals the wallet balance.
    pub async fn history_total(
        &mut self,
        user_id: Uuid,
        wallet_type: &str,
    ) -> Result<BigDecimal, AppError> {
        let total: Option<BigDecimal> = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount), 0)
            FROM wallet_history
            WHERE user_id = $1 AND wallet_type = $2
            "#,
        )
        .bind(user_id)
        .bind(wallet_type)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(total.unwrap_or_else(|| BigDecimal::from(0)))
    }

    /// Finds the ledger row written for a batch (e.g. a purchase request).
    pub async fn find_by_batch(
        &mut self,
        request_batch_id: Uuid,
        source_type: &str,
    ) -> Result<Option<WalletHistory>, AppError> {
        let row = sqlx::query_as(&format!(
            r#"
            SELECT {WALLET_HISTORY_COLUMNS}
            FROM wallet_history
            WHERE request_batch_id = $1 AND source_type = $2
            ORDER BY created_at ASC
            LIMIT 1
            "#
        ))
        .bind(request_batch_id)
        .bind(source_type)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::wallet_history::{CHANGE_PAYMENT, SOURCE_PURCHASE};

    #[test]
    fn test_balance_change_builder() {
        let batch = Uuid::new_v4();
        let change = BalanceChange::new(
            Uuid::new_v4(),
            "regular_coin",
            BigDecimal::from(1000),
            CHANGE_PAYMENT,
            SOURCE_PURCHASE,
        )
        .with_batch(batch)
        .with_reason("purchase")
        .with_meta(json!({"transactionId": "t1"}));

        assert_eq!(change.request_batch_id, Some(batch));
        assert_eq!(change.reason.as_deref(), Some("purchase"));
        assert_eq!(change.meta["transactionId"], "t1");
        assert!(change.validate().is_ok());
    }

    #[test]
    fn test_zero_change_is_rejected() {
        let change = BalanceChange::new(
            Uuid::new_v4(),
            "regular_coin",
            BigDecimal::from(0),
            CHANGE_PAYMENT,
            SOURCE_PURCHASE,
        );
        assert!(matches!(change.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_blank_wallet_type_is_rejected() {
        let change = BalanceChange::new(
            Uuid::new_v4(),
            "  ",
            BigDecimal::from(5),
            CHANGE_PAYMENT,
            SOURCE_PURCHASE,
        );
        assert!(matches!(change.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_negative_change_is_valid() {
        let change = BalanceChange::new(
            Uuid::new_v4(),
            "regular_coin",
            BigDecimal::from(-5),
            "consume",
            "shop",
        );
        assert!(change.validate().is_ok());
    }

    #[test]
    fn test_reservation_consumption_defaults() {
        let consumption = ReservationConsumption::new("consume");
        assert_eq!(consumption.source_type, SOURCE_RESERVATION);
        assert!(consumption.request_batch_id.is_none());
    }
}
