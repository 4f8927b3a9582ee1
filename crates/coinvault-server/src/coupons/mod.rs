//! Coupon effect resolution, dispatched on the coupon's category.
//!
//! Each category registers one [`CouponHandler`]. Handlers are registered once at start-up
//! (see [`crate::bootstrap`]) and the registry is read-only while serving requests.

pub mod discount;
pub mod referral;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::Serialize;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::coupon::COUPON_COLUMNS;
use crate::models::Coupon;

pub use discount::{DiscountEffect, DiscountSettings, DiscountType, PurchaseDiscountHandler};
pub use referral::ReferralCouponHandler;

/// Point in the purchase lifecycle at which a coupon is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CouponStage {
    /// Pricing a new purchase or a preview.
    Quote,
    /// Re-checking a coupon already priced into a paid purchase.
    Completion,
}

/// A coupon being applied by a user to a payment.
#[derive(Debug, Clone, Copy)]
pub struct CouponUse<'a> {
    pub coupon: &'a Coupon,
    pub user_id: Uuid,
    /// Payment amount before any discount.
    pub payment_amount: &'a BigDecimal,
    pub stage: CouponStage,
}

/// Outcome of a read-only coupon check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CouponValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CouponValidation {
    pub fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// Category-specific effect of a coupon.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CouponEffect {
    Discount(DiscountEffect),
    Referral {
        #[serde(rename = "inviterUserId")]
        inviter_user_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        discount: Option<DiscountEffect>,
    },
}

impl CouponEffect {
    /// Discount taken off the payment amount; zero when the effect carries no discount.
    pub fn discount_amount(&self) -> BigDecimal {
        match self {
            CouponEffect::Discount(d) => d.discount_amount.clone(),
            CouponEffect::Referral {
                discount: Some(d), ..
            } => d.discount_amount.clone(),
            CouponEffect::Referral { discount: None, .. } => BigDecimal::from(0),
        }
    }

    /// Amount left to pay after the effect is applied to `payment_amount`.
    pub fn final_payment_amount(&self, payment_amount: &BigDecimal) -> BigDecimal {
        payment_amount - self.discount_amount()
    }
}

/// Behaviour attached to one coupon category.
#[async_trait]
pub trait CouponHandler: Send + Sync {
    /// Read-only check that the coupon may be used for this payment.
    async fn validate_for_use(
        &self,
        conn: &mut PgConnection,
        usage: &CouponUse<'_>,
    ) -> Result<CouponValidation, AppError>;

    /// Computes the effect. Only called after a successful validation.
    fn resolve_effect(&self, usage: &CouponUse<'_>) -> Result<CouponEffect, AppError>;

    /// Side effect fired once after the purchase's core write.
    async fn on_redeemed(
        &self,
        _conn: &mut PgConnection,
        _coupon: &Coupon,
        _user_id: Uuid,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Human-readable description for clients.
    fn describe_effect(&self, _coupon: &Coupon) -> Option<String> {
        None
    }
}

/// Result of previewing a coupon for a client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponPreview {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect: Option<CouponEffect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Category → handler map.
#[derive(Default, Clone)]
pub struct CouponRegistry {
    handlers: HashMap<String, Arc<dyn CouponHandler>>,
}

impl CouponRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for `category`. A second registration replaces the first.
    pub fn register(&mut self, category: impl Into<String>, handler: Arc<dyn CouponHandler>) {
        let category = category.into();
        if self.handlers.contains_key(&category) {
            tracing::warn!(
                category = %category,
                "Coupon handler registered twice, replacing the previous handler"
            );
        }
        self.handlers.insert(category, handler);
    }

    pub fn get(&self, category: &str) -> Option<Arc<dyn CouponHandler>> {
        self.handlers.get(category).cloned()
    }

    pub fn categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = self.handlers.keys().cloned().collect();
        categories.sort();
        categories
    }

    fn handler_for(&self, coupon: &Coupon) -> Result<Arc<dyn CouponHandler>, AppError> {
        self.get(&coupon.category).ok_or_else(|| {
            AppError::Validation(format!(
                "Coupon category {} is not supported",
                coupon.category
            ))
        })
    }

    /// Validates the coupon and returns its effect, failing with `Validation` if it
    /// cannot be used.
    pub async fn apply(
        &self,
        conn: &mut PgConnection,
        coupon: &Coupon,
        user_id: Uuid,
        payment_amount: &BigDecimal,
        stage: CouponStage,
    ) -> Result<CouponEffect, AppError> {
        if !coupon.is_active() {
            return Err(AppError::Validation(format!(
                "Coupon {} is no longer active",
                coupon.code
            )));
        }

        let handler = self.handler_for(coupon)?;
        let usage = CouponUse {
            coupon,
            user_id,
            payment_amount,
            stage,
        };

        let validation = handler.validate_for_use(conn, &usage).await?;
        if !validation.valid {
            return Err(AppError::Validation(validation.reason.unwrap_or_else(|| {
                format!("Coupon {} cannot be used", coupon.code)
            })));
        }

        handler.resolve_effect(&usage)
    }

    /// Same checks as [`apply`](Self::apply) but reports invalid coupons in the result.
    pub async fn preview(
        &self,
        conn: &mut PgConnection,
        coupon: &Coupon,
        user_id: Uuid,
        payment_amount: &BigDecimal,
    ) -> Result<CouponPreview, AppError> {
        let description = self
            .get(&coupon.category)
            .and_then(|handler| handler.describe_effect(coupon));

        match self
            .apply(conn, coupon, user_id, payment_amount, CouponStage::Quote)
            .await
        {
            Ok(effect) => Ok(CouponPreview {
                valid: true,
                reason: None,
                effect: Some(effect),
                description,
            }),
            Err(AppError::Validation(reason)) => Ok(CouponPreview {
                valid: false,
                reason: Some(reason),
                effect: None,
                description,
            }),
            Err(e) => Err(e),
        }
    }

    /// Fires the category's redemption side effect.
    pub async fn on_redeemed(
        &self,
        conn: &mut PgConnection,
        coupon: &Coupon,
        user_id: Uuid,
    ) -> anyhow::Result<()> {
        match self.get(&coupon.category) {
            Some(handler) => handler.on_redeemed(conn, coupon, user_id).await,
            None => Ok(()),
        }
    }
}

/// Loads a coupon by its code.
pub async fn find_coupon_by_code(
    conn: &mut PgConnection,
    code: &str,
) -> Result<Option<Coupon>, AppError> {
    let coupon = sqlx::query_as(&format!(
        "SELECT {COUPON_COLUMNS} FROM coupons WHERE code = $1"
    ))
    .bind(code)
    .fetch_optional(conn)
    .await?;
    Ok(coupon)
}

/// Loads a coupon by code, treating an unknown code as bad input.
pub async fn require_coupon(conn: &mut PgConnection, code: &str) -> Result<Coupon, AppError> {
    find_coupon_by_code(conn, code)
        .await?
        .ok_or_else(|| AppError::Validation(format!("Unknown coupon code: {}", code)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    struct NoopHandler;

    #[async_trait]
    impl CouponHandler for NoopHandler {
        async fn validate_for_use(
            &self,
            _conn: &mut PgConnection,
            _usage: &CouponUse<'_>,
        ) -> Result<CouponValidation, AppError> {
            Ok(CouponValidation::ok())
        }

        fn resolve_effect(&self, usage: &CouponUse<'_>) -> Result<CouponEffect, AppError> {
            Ok(CouponEffect::Discount(DiscountEffect {
                discount_amount: BigDecimal::from(0),
                final_payment_amount: usage.payment_amount.clone(),
                label: "noop".to_string(),
            }))
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = CouponRegistry::new();
        registry.register("noop", Arc::new(NoopHandler));
        assert!(registry.get("noop").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_duplicate_registration_replaces() {
        let mut registry = CouponRegistry::new();
        registry.register("noop", Arc::new(NoopHandler));
        registry.register("noop", Arc::new(NoopHandler));
        assert_eq!(registry.categories(), vec!["noop".to_string()]);
    }

    #[test]
    fn test_effect_discount_amounts() {
        let effect = CouponEffect::Discount(DiscountEffect {
            discount_amount: BigDecimal::from(300),
            final_payment_amount: BigDecimal::from(700),
            label: "50% off".to_string(),
        });
        assert_eq!(effect.discount_amount(), BigDecimal::from(300));
        assert_eq!(
            effect.final_payment_amount(&BigDecimal::from(1000)),
            BigDecimal::from(700)
        );

        let referral = CouponEffect::Referral {
            inviter_user_id: Uuid::new_v4(),
            discount: None,
        };
        assert_eq!(referral.discount_amount(), BigDecimal::from(0));
        assert_eq!(
            referral.final_payment_amount(&BigDecimal::from_str("12.50").unwrap()),
            BigDecimal::from_str("12.50").unwrap()
        );
    }

    #[test]
    fn test_effect_serialization_is_tagged() {
        let effect = CouponEffect::Discount(DiscountEffect {
            discount_amount: BigDecimal::from(300),
            final_payment_amount: BigDecimal::from(700),
            label: "50% off (up to 300)".to_string(),
        });
        let value = serde_json::to_value(&effect).unwrap();
        assert_eq!(value["kind"], "discount");
        assert_eq!(value["label"], "50% off (up to 300)");
        assert!(value.get("discountAmount").is_some());
    }

    #[test]
    fn test_validation_constructors() {
        assert!(CouponValidation::ok().valid);
        let invalid = CouponValidation::invalid("expired");
        assert!(!invalid.valid);
        assert_eq!(invalid.reason.as_deref(), Some("expired"));
    }
}
