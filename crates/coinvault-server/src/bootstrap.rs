//! Composition root: builds every registry once at start-up.
//!
//! Registries are filled here and then frozen behind an `Arc`; nothing registers handlers
//! while requests are being served.

use std::sync::Arc;

use bigdecimal::BigDecimal;

use crate::config::Config;
use crate::coupons::{CouponRegistry, PurchaseDiscountHandler, ReferralCouponHandler};
use crate::hooks::{HookRegistry, PurchaseStatsHook};
use crate::models::{CATEGORY_PURCHASE_DISCOUNT, CATEGORY_REFERRAL};
use crate::payment_providers::SessionEnricher;
use crate::rewards::{
    RecipientRole, RewardDefinition, RewardRegistry, WalletCreditReward,
    TRIGGER_PURCHASE_COMPLETED, TRIGGER_REFERRAL_CREATED,
};

/// Inviter bonus when a referral is created.
pub const REWARD_INVITER_SIGNUP: &str = "inviter_signup_bonus";
/// Invitee bonus when a referral is created.
pub const REWARD_INVITEE_WELCOME: &str = "invitee_welcome_bonus";
/// Inviter bonus the first time the invitee completes a purchase.
pub const REWARD_INVITER_FIRST_PURCHASE: &str = "inviter_first_purchase_bonus";

/// Every extension point of the purchase engine.
#[derive(Default, Clone)]
pub struct Extensions {
    pub hooks: HookRegistry,
    pub coupons: CouponRegistry,
    pub rewards: Arc<RewardRegistry>,
    session_enricher: Option<Arc<dyn SessionEnricher>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the session enricher. There is a single slot; a second call replaces the first.
    pub fn set_session_enricher(&mut self, enricher: Arc<dyn SessionEnricher>) {
        if self.session_enricher.is_some() {
            tracing::warn!("Session enricher registered twice, replacing the previous enricher");
        }
        self.session_enricher = Some(enricher);
    }

    pub fn session_enricher(&self) -> Option<Arc<dyn SessionEnricher>> {
        self.session_enricher.clone()
    }
}

fn register_credit(
    rewards: &mut RewardRegistry,
    definition: RewardDefinition,
    wallet_type: &str,
    amount: &BigDecimal,
) {
    let key = definition.key.clone();
    rewards.register_definition(definition);
    if amount > &BigDecimal::from(0) {
        rewards.register_handler(key, Arc::new(WalletCreditReward::new(wallet_type, amount.clone())));
    } else {
        tracing::info!(reward_key = %key, "Reward amount is zero, no handler registered");
    }
}

/// Builds the reward registry from configuration.
pub fn register_rewards(config: &Config) -> RewardRegistry {
    let mut rewards = RewardRegistry::new();
    let wallet_type = config.referral_wallet_type.as_str();

    register_credit(
        &mut rewards,
        RewardDefinition::new(
            REWARD_INVITER_SIGNUP,
            TRIGGER_REFERRAL_CREATED,
            RecipientRole::Inviter,
        ),
        wallet_type,
        &config.referral_inviter_bonus,
    );
    register_credit(
        &mut rewards,
        RewardDefinition::new(
            REWARD_INVITEE_WELCOME,
            TRIGGER_REFERRAL_CREATED,
            RecipientRole::Invitee,
        ),
        wallet_type,
        &config.referral_invitee_bonus,
    );
    register_credit(
        &mut rewards,
        RewardDefinition::new(
            REWARD_INVITER_FIRST_PURCHASE,
            TRIGGER_PURCHASE_COMPLETED,
            RecipientRole::Inviter,
        ),
        wallet_type,
        &config.referral_first_purchase_bonus,
    );

    rewards
}

/// Registers every built-in hook, coupon category and reward.
pub fn register_all(config: &Config) -> Extensions {
    let rewards = Arc::new(register_rewards(config));

    let mut coupons = CouponRegistry::new();
    coupons.register(CATEGORY_PURCHASE_DISCOUNT, Arc::new(PurchaseDiscountHandler));
    coupons.register(
        CATEGORY_REFERRAL,
        Arc::new(ReferralCouponHandler::new(rewards.clone())),
    );

    let mut hooks = HookRegistry::new();
    hooks.register(PurchaseStatsHook::registration());

    tracing::info!(
        hooks = hooks.len(),
        coupon_categories = ?coupons.categories(),
        "Purchase engine extensions registered"
    );

    Extensions {
        hooks,
        coupons,
        rewards,
        session_enricher: None,
    }
}
