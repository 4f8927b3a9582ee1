//! `referral` coupons: an inviter's code redeemed by a new user.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use sqlx::PgConnection;
use uuid::Uuid;

use super::discount::{compute_discount, DiscountSettings};
use super::{CouponEffect, CouponHandler, CouponStage, CouponUse, CouponValidation};
use crate::error::AppError;
use crate::models::{Coupon, Referral};
use crate::referrals;
use crate::rewards::{trigger_rewards, RewardRegistry, TRIGGER_REFERRAL_CREATED};

/// Handler for the `referral` category.
///
/// Redeeming records the referral and fires the `referral_created` rewards. The coupon may
/// also carry discount settings, applied the same way as a `purchase_discount` coupon.
#[derive(Clone)]
pub struct ReferralCouponHandler {
    rewards: Arc<RewardRegistry>,
}

impl ReferralCouponHandler {
    pub fn new(rewards: Arc<RewardRegistry>) -> Self {
        Self { rewards }
    }

    fn inviter(coupon: &Coupon) -> Result<Uuid, AppError> {
        coupon.attribution_user_id.ok_or_else(|| {
            AppError::Validation(format!(
                "Referral coupon {} has no attributed inviter",
                coupon.code
            ))
        })
    }

    fn discount_settings(coupon: &Coupon) -> Result<Option<DiscountSettings>, AppError> {
        if !DiscountSettings::is_present(&coupon.settings) {
            return Ok(None);
        }
        DiscountSettings::from_settings(&coupon.code, &coupon.settings).map(Some)
    }
}

/// At completion, a referral already recorded by this same coupon and inviter does not
/// block the purchase: it was created by an earlier purchase redeeming the same code and
/// `on_redeemed` skips it.
fn is_same_redemption(
    existing: &Referral,
    coupon: &Coupon,
    inviter: Uuid,
    stage: CouponStage,
) -> bool {
    stage == CouponStage::Completion
        && existing.inviter_user_id == inviter
        && existing.coupon_id == Some(coupon.id)
}

#[async_trait]
impl CouponHandler for ReferralCouponHandler {
    async fn validate_for_use(
        &self,
        conn: &mut PgConnection,
        usage: &CouponUse<'_>,
    ) -> Result<CouponValidation, AppError> {
        let inviter = Self::inviter(usage.coupon)?;
        if inviter == usage.user_id {
            return Ok(CouponValidation::invalid(
                "You cannot redeem your own referral code",
            ));
        }

        if let Some(existing) = referrals::find_by_invitee(conn, usage.user_id).await? {
            if !is_same_redemption(&existing, usage.coupon, inviter, usage.stage) {
                return Ok(CouponValidation::invalid("User has already been referred"));
            }
        }

        if let Some(settings) = Self::discount_settings(usage.coupon)? {
            if let Err(reason) = compute_discount(&settings, usage.payment_amount) {
                return Ok(CouponValidation::invalid(reason));
            }
        }

        Ok(CouponValidation::ok())
    }

    fn resolve_effect(&self, usage: &CouponUse<'_>) -> Result<CouponEffect, AppError> {
        let inviter_user_id = Self::inviter(usage.coupon)?;
        let discount = match Self::discount_settings(usage.coupon)? {
            Some(settings) => Some(
                compute_discount(&settings, usage.payment_amount).map_err(AppError::Validation)?,
            ),
            None => None,
        };
        Ok(CouponEffect::Referral {
            inviter_user_id,
            discount,
        })
    }

    async fn on_redeemed(
        &self,
        conn: &mut PgConnection,
        coupon: &Coupon,
        user_id: Uuid,
    ) -> anyhow::Result<()> {
        let inviter = Self::inviter(coupon)?;

        let Some(referral) =
            referrals::create_referral(conn, inviter, user_id, Some(coupon.id)).await?
        else {
            tracing::debug!(
                user_id = %user_id,
                coupon = %coupon.code,
                "Referral already recorded, skipping referral_created rewards"
            );
            return Ok(());
        };

        tracing::info!(
            referral_id = %referral.id,
            inviter_user_id = %inviter,
            invitee_user_id = %user_id,
            "Referral created"
        );

        trigger_rewards(
            &self.rewards,
            conn,
            TRIGGER_REFERRAL_CREATED,
            &referral,
            &json!({ "couponCode": coupon.code }),
        )
        .await?;
        Ok(())
    }

    fn describe_effect(&self, coupon: &Coupon) -> Option<String> {
        match Self::discount_settings(coupon) {
            Ok(Some(settings)) => Some(format!("Referral code: {}", settings.label())),
            Ok(None) => Some("Referral code".to_string()),
            Err(_) => None,
        }
    }
}
