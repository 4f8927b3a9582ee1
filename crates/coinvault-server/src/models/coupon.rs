//! Coupon model. The `category` selects the effect handler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

/// Category dispatched to the discount handler.
pub const CATEGORY_PURCHASE_DISCOUNT: &str = "purchase_discount";
/// Category dispatched to the referral handler.
pub const CATEGORY_REFERRAL: &str = "referral";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "coupon_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CouponStatus {
    Active,
    Inactive,
}

/// Represents a redeemable coupon.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    /// Issuer kind, e.g. `invite` or `official`.
    #[serde(rename = "type")]
    pub coupon_type: String,
    pub category: String,
    /// Category-specific configuration.
    pub settings: serde_json::Value,
    /// User who issued the coupon (referral inviter).
    pub attribution_user_id: Option<Uuid>,
    pub status: CouponStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const COUPON_COLUMNS: &str = "id, code, coupon_type, category, settings, \
    attribution_user_id, status, created_at, updated_at";

impl Coupon {
    pub fn is_active(&self) -> bool {
        self.status == CouponStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coupon_serializes_type_field() {
        let coupon = Coupon {
            id: Uuid::new_v4(),
            code: "WELCOME50".to_string(),
            coupon_type: "official".to_string(),
            category: CATEGORY_PURCHASE_DISCOUNT.to_string(),
            settings: json!({"discountType": "percentage", "discountValue": 50}),
            attribution_user_id: None,
            status: CouponStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let value = serde_json::to_value(&coupon).unwrap();
        assert_eq!(value["type"], "official");
        assert_eq!(value["category"], "purchase_discount");
        assert_eq!(value["status"], "active");
        assert!(coupon.is_active());
    }
}
