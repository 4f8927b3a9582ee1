//! Purchase request model tracking one attempt to buy wallet currency.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

/// Lifecycle states of a purchase request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "purchase_request_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PurchaseStatus {
    /// Created, waiting for the provider.
    Pending,
    /// Provider reported the payment as in flight.
    Processing,
    /// Payment confirmed and wallet credited.
    Completed,
    /// Payment failed or was cancelled.
    Failed,
    /// Timed out before the provider confirmed.
    Expired,
}

impl PurchaseStatus {
    /// Returns true for states that can still be completed, failed or expired.
    pub fn is_open(self) -> bool {
        matches!(self, PurchaseStatus::Pending | PurchaseStatus::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PurchaseStatus::Pending => "pending",
            PurchaseStatus::Processing => "processing",
            PurchaseStatus::Completed => "completed",
            PurchaseStatus::Failed => "failed",
            PurchaseStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a purchase request row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub id: Uuid,
    /// Client-generated key, unique across all requests.
    pub idempotency_key: String,
    /// Fingerprint of the client payload the key was first used with.
    #[serde(skip_serializing)]
    pub request_fingerprint: String,
    pub user_id: Uuid,
    pub wallet_type: String,
    /// Currency units credited on completion.
    pub amount: BigDecimal,
    /// Amount charged after discounts.
    pub payment_amount: BigDecimal,
    /// Amount before discounts.
    pub original_payment_amount: BigDecimal,
    pub discount_amount: BigDecimal,
    pub coupon_code: Option<String>,
    pub payment_provider: String,
    pub payment_method: String,
    pub payment_session_id: Option<String>,
    pub transaction_id: Option<String>,
    pub redirect_url: Option<String>,
    #[serde(skip_serializing)]
    pub webhook_signature: Option<String>,
    pub status: PurchaseStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data required to create a new purchase request.
#[derive(Debug, Clone)]
pub struct NewPurchaseRequest {
    pub idempotency_key: String,
    pub request_fingerprint: String,
    pub user_id: Uuid,
    pub wallet_type: String,
    pub amount: BigDecimal,
    pub payment_amount: BigDecimal,
    pub original_payment_amount: BigDecimal,
    pub discount_amount: BigDecimal,
    pub coupon_code: Option<String>,
    pub payment_provider: String,
    pub payment_method: String,
    pub expires_at: DateTime<Utc>,
}

/// Column list shared by every query returning a full purchase request.
pub const PURCHASE_REQUEST_COLUMNS: &str = "id, idempotency_key, request_fingerprint, user_id, \
    wallet_type, amount, payment_amount, original_payment_amount, discount_amount, coupon_code, \
    payment_provider, payment_method, payment_session_id, transaction_id, redirect_url, \
    webhook_signature, status, error_code, error_message, paid_at, completed_at, expires_at, \
    created_at, updated_at";

impl PurchaseRequest {
    pub fn is_completed(&self) -> bool {
        self.status == PurchaseStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == PurchaseStatus::Failed
    }

    /// Returns true if the request is open but its deadline has passed.
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.status.is_open() && self.expires_at < now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::str::FromStr;

    fn sample_request(status: PurchaseStatus) -> PurchaseRequest {
        let now = Utc::now();
        PurchaseRequest {
            id: Uuid::new_v4(),
            idempotency_key: "k1".to_string(),
            request_fingerprint: "sha256:abc".to_string(),
            user_id: Uuid::new_v4(),
            wallet_type: "regular_coin".to_string(),
            amount: BigDecimal::from(1000),
            payment_amount: BigDecimal::from(1000),
            original_payment_amount: BigDecimal::from(1000),
            discount_amount: BigDecimal::from(0),
            coupon_code: None,
            payment_provider: "dummy".to_string(),
            payment_method: "card".to_string(),
            payment_session_id: Some("dummy_session_1".to_string()),
            transaction_id: None,
            redirect_url: None,
            webhook_signature: None,
            status,
            error_code: None,
            error_message: None,
            paid_at: None,
            completed_at: None,
            expires_at: now + Duration::minutes(30),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&PurchaseStatus::Pending).unwrap(),
            "\"pending\""
        );
        assert_eq!(
            serde_json::to_string(&PurchaseStatus::Processing).unwrap(),
            "\"processing\""
        );
        assert_eq!(
            serde_json::from_str::<PurchaseStatus>("\"expired\"").unwrap(),
            PurchaseStatus::Expired
        );
    }

    #[test]
    fn test_open_states() {
        assert!(PurchaseStatus::Pending.is_open());
        assert!(PurchaseStatus::Processing.is_open());
        assert!(!PurchaseStatus::Completed.is_open());
        assert!(!PurchaseStatus::Failed.is_open());
        assert!(!PurchaseStatus::Expired.is_open());
    }

    #[test]
    fn test_status_helpers() {
        let request = sample_request(PurchaseStatus::Pending);
        assert!(!request.is_completed());
        assert!(!request.is_failed());
        assert!(sample_request(PurchaseStatus::Completed).is_completed());
        assert!(sample_request(PurchaseStatus::Failed).is_failed());
    }

    #[test]
    fn test_past_deadline_only_for_open_requests() {
        let mut request = sample_request(PurchaseStatus::Pending);
        let later = request.expires_at + Duration::seconds(1);
        assert!(request.is_past_deadline(later));

        request.status = PurchaseStatus::Completed;
        assert!(!request.is_past_deadline(later));
    }

    #[test]
    fn test_serialization_hides_internal_fields() {
        let mut request = sample_request(PurchaseStatus::Completed);
        request.webhook_signature = Some("t=1,v1=ab".to_string());
        request.discount_amount = BigDecimal::from_str("300").unwrap();

        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("webhookSignature").is_none());
        assert!(value.get("requestFingerprint").is_none());
        assert_eq!(value["status"], "completed");
        assert_eq!(value["walletType"], "regular_coin");
    }
}
