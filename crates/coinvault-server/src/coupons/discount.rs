//! `purchase_discount` coupons: fixed or percentage discounts on the payment amount.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;

use super::{CouponEffect, CouponHandler, CouponUse, CouponValidation};
use crate::error::AppError;
use crate::models::Coupon;

/// Decimal places kept on computed discounts (billing currency minor units).
const DISCOUNT_SCALE: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    /// Subtract a flat amount.
    Fixed,
    /// Subtract a share of the payment amount.
    Percentage,
}

/// Discount configuration stored in `coupons.settings`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountSettings {
    pub discount_type: DiscountType,
    pub discount_value: BigDecimal,
    #[serde(default)]
    pub max_discount_amount: Option<BigDecimal>,
}

impl DiscountSettings {
    /// Parses discount settings, rejecting missing or malformed configuration.
    pub fn from_settings(code: &str, settings: &serde_json::Value) -> Result<Self, AppError> {
        let parsed: DiscountSettings = serde_json::from_value(settings.clone()).map_err(|e| {
            AppError::Validation(format!("Coupon {} has invalid discount settings: {}", code, e))
        })?;

        let zero = BigDecimal::from(0);
        if parsed.discount_value <= zero {
            return Err(AppError::Validation(format!(
                "Coupon {} must have a positive discount value",
                code
            )));
        }
        if parsed.discount_type == DiscountType::Percentage
            && parsed.discount_value > BigDecimal::from(100)
        {
            return Err(AppError::Validation(format!(
                "Coupon {} has a percentage above 100",
                code
            )));
        }
        if let Some(max) = &parsed.max_discount_amount {
            if max <= &zero {
                return Err(AppError::Validation(format!(
                    "Coupon {} must have a positive maximum discount",
                    code
                )));
            }
        }

        Ok(parsed)
    }

    /// Returns true if `settings` looks like it carries a discount at all.
    pub fn is_present(settings: &serde_json::Value) -> bool {
        settings.get("discountType").is_some()
    }

    pub fn label(&self) -> String {
        match (self.discount_type, &self.max_discount_amount) {
            (DiscountType::Fixed, _) => format!("{} off", self.discount_value),
            (DiscountType::Percentage, None) => format!("{}% off", self.discount_value),
            (DiscountType::Percentage, Some(max)) => {
                format!("{}% off (up to {})", self.discount_value, max)
            }
        }
    }
}

/// Computed discount for one payment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountEffect {
    pub discount_amount: BigDecimal,
    pub final_payment_amount: BigDecimal,
    pub label: String,
}

/// Computes the discount for `payment_amount`.
///
/// Returns `Err(reason)` when the discounted payment would not be positive.
pub fn compute_discount(
    settings: &DiscountSettings,
    payment_amount: &BigDecimal,
) -> Result<DiscountEffect, String> {
    let zero = BigDecimal::from(0);
    if payment_amount <= &zero {
        return Err("Payment amount must be positive".to_string());
    }

    let raw = match settings.discount_type {
        DiscountType::Fixed => settings.discount_value.clone(),
        DiscountType::Percentage => {
            payment_amount * &settings.discount_value / BigDecimal::from(100)
        }
    };

    let mut discount = raw.with_scale(DISCOUNT_SCALE);
    if let Some(max) = &settings.max_discount_amount {
        if &discount > max {
            discount = max.clone();
        }
    }

    let final_payment_amount = payment_amount - &discount;
    if final_payment_amount <= zero {
        return Err(format!(
            "Payment amount {} does not cover the discount of {}",
            payment_amount, discount
        ));
    }

    Ok(DiscountEffect {
        discount_amount: discount,
        final_payment_amount,
        label: settings.label(),
    })
}

/// Handler for the `purchase_discount` category.
#[derive(Debug, Default, Clone, Copy)]
pub struct PurchaseDiscountHandler;

#[async_trait]
impl CouponHandler for PurchaseDiscountHandler {
    async fn validate_for_use(
        &self,
        _conn: &mut PgConnection,
        usage: &CouponUse<'_>,
    ) -> Result<CouponValidation, AppError> {
        let settings = DiscountSettings::from_settings(&usage.coupon.code, &usage.coupon.settings)?;
        Ok(match compute_discount(&settings, usage.payment_amount) {
            Ok(_) => CouponValidation::ok(),
            Err(reason) => CouponValidation::invalid(reason),
        })
    }

    fn resolve_effect(&self, usage: &CouponUse<'_>) -> Result<CouponEffect, AppError> {
        let settings = DiscountSettings::from_settings(&usage.coupon.code, &usage.coupon.settings)?;
        compute_discount(&settings, usage.payment_amount)
            .map(CouponEffect::Discount)
            .map_err(AppError::Validation)
    }

    fn describe_effect(&self, coupon: &Coupon) -> Option<String> {
        DiscountSettings::from_settings(&coupon.code, &coupon.settings)
            .ok()
            .map(|settings| settings.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    fn dec(value: &str) -> BigDecimal {
        BigDecimal::from_str(value).unwrap()
    }

    fn percentage(value: &str, max: Option<&str>) -> DiscountSettings {
        DiscountSettings {
            discount_type: DiscountType::Percentage,
            discount_value: dec(value),
            max_discount_amount: max.map(dec),
        }
    }

    fn fixed(value: &str) -> DiscountSettings {
        DiscountSettings {
            discount_type: DiscountType::Fixed,
            discount_value: dec(value),
            max_discount_amount: None,
        }
    }

    #[test]
    fn test_percentage_clamped_to_max() {
        let effect = compute_discount(&percentage("50", Some("300")), &dec("1000")).unwrap();
        assert_eq!(effect.discount_amount, dec("300"));
        assert_eq!(effect.final_payment_amount, dec("700"));
        assert_eq!(effect.label, "50% off (up to 300)");
    }

    #[test]
    fn test_percentage_below_max_is_not_clamped() {
        let effect = compute_discount(&percentage("10", Some("300")), &dec("1000")).unwrap();
        assert_eq!(effect.discount_amount, dec("100"));
        assert_eq!(effect.final_payment_amount, dec("900"));
    }

    #[test]
    fn test_percentage_truncates_to_cents() {
        let effect = compute_discount(&percentage("33", None), &dec("10.01")).unwrap();
        // 10.01 * 0.33 = 3.3033
        assert_eq!(effect.discount_amount, dec("3.30"));
        assert_eq!(effect.final_payment_amount, dec("6.71"));
    }

    #[test]
    fn test_fixed_discount() {
        let effect = compute_discount(&fixed("250"), &dec("1000")).unwrap();
        assert_eq!(effect.discount_amount, dec("250"));
        assert_eq!(effect.final_payment_amount, dec("750"));
        assert_eq!(effect.label, "250 off");
    }

    #[test]
    fn test_fixed_discount_covering_payment_is_rejected() {
        assert!(compute_discount(&fixed("1000"), &dec("1000")).is_err());
        assert!(compute_discount(&fixed("1500"), &dec("1000")).is_err());
    }

    #[test]
    fn test_full_percentage_is_rejected() {
        assert!(compute_discount(&percentage("100", None), &dec("1000")).is_err());
    }

    #[test]
    fn test_settings_parsing() {
        let settings = DiscountSettings::from_settings(
            "HALF",
            &json!({"discountType": "percentage", "discountValue": 50, "maxDiscountAmount": 300}),
        )
        .unwrap();
        assert_eq!(settings, percentage("50", Some("300")));
    }

    #[test]
    fn test_missing_settings_is_validation_error() {
        let err = DiscountSettings::from_settings("EMPTY", &json!({})).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_invalid_settings_values() {
        assert!(DiscountSettings::from_settings(
            "NEG",
            &json!({"discountType": "fixed", "discountValue": -5})
        )
        .is_err());
        assert!(DiscountSettings::from_settings(
            "HUGE",
            &json!({"discountType": "percentage", "discountValue": 150})
        )
        .is_err());
        assert!(DiscountSettings::from_settings(
            "ZEROMAX",
            &json!({"discountType": "percentage", "discountValue": 10, "maxDiscountAmount": 0})
        )
        .is_err());
    }

    #[test]
    fn test_is_present() {
        assert!(DiscountSettings::is_present(&json!({"discountType": "fixed"})));
        assert!(!DiscountSettings::is_present(&json!({"welcome": true})));
    }
}
