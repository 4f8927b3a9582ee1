//! Referral reward definitions and their handlers.
//!
//! A definition says which reward key fires on which trigger and who receives it. A handler
//! says what fulfilling the reward does. Both are registered at start-up; fulfillment lives
//! in [`fulfillment`].

pub mod fulfillment;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::ledger::{BalanceChange, Ledger};
use crate::models::wallet_history::{CHANGE_REWARD, SOURCE_REFERRAL_REWARD};
use crate::models::Referral;

pub use fulfillment::{fulfill_reward, trigger_rewards, RewardOutcome};

/// Fired when an invitee redeems a referral coupon.
pub const TRIGGER_REFERRAL_CREATED: &str = "referral_created";
/// Fired when a referred user completes a purchase.
pub const TRIGGER_PURCHASE_COMPLETED: &str = "purchase_completed";

/// Side of the referral that receives a reward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientRole {
    Inviter,
    Invitee,
}

impl RecipientRole {
    pub fn recipient(self, referral: &Referral) -> Uuid {
        match self {
            RecipientRole::Inviter => referral.inviter_user_id,
            RecipientRole::Invitee => referral.invitee_user_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardDefinition {
    pub key: String,
    pub trigger: String,
    pub recipient_role: RecipientRole,
}

impl RewardDefinition {
    pub fn new(
        key: impl Into<String>,
        trigger: impl Into<String>,
        recipient_role: RecipientRole,
    ) -> Self {
        Self {
            key: key.into(),
            trigger: trigger.into(),
            recipient_role,
        }
    }
}

/// Everything a handler knows about the reward it is fulfilling.
#[derive(Debug, Clone, Copy)]
pub struct RewardContext<'a> {
    pub reward_key: &'a str,
    pub trigger: &'a str,
    pub referral: &'a Referral,
    pub recipient_user_id: Uuid,
    /// Trigger-specific data, e.g. the purchase request id.
    pub data: &'a serde_json::Value,
}

/// Performs the side effect of one reward key.
#[async_trait]
pub trait RewardHandler: Send + Sync {
    /// Runs inside a savepoint. The returned value is stored as the reward's metadata.
    async fn execute(
        &self,
        conn: &mut PgConnection,
        ctx: &RewardContext<'_>,
    ) -> anyhow::Result<serde_json::Value>;
}

#[derive(Default, Clone)]
pub struct RewardRegistry {
    definitions: Vec<RewardDefinition>,
    handlers: HashMap<String, Arc<dyn RewardHandler>>,
}

impl RewardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a definition. Re-registering a key replaces it in place.
    pub fn register_definition(&mut self, definition: RewardDefinition) {
        match self
            .definitions
            .iter_mut()
            .find(|existing| existing.key == definition.key)
        {
            Some(existing) => {
                tracing::warn!(
                    reward_key = %definition.key,
                    "Reward definition registered twice, replacing the previous definition"
                );
                *existing = definition;
            }
            None => self.definitions.push(definition),
        }
    }

    pub fn register_handler(&mut self, reward_key: impl Into<String>, handler: Arc<dyn RewardHandler>) {
        let reward_key = reward_key.into();
        if self.handlers.contains_key(&reward_key) {
            tracing::warn!(
                reward_key = %reward_key,
                "Reward handler registered twice, replacing the previous handler"
            );
        }
        self.handlers.insert(reward_key, handler);
    }

    /// Definitions fired by `trigger`, in registration order.
    pub fn definitions_for(&self, trigger: &str) -> Vec<RewardDefinition> {
        self.definitions
            .iter()
            .filter(|definition| definition.trigger == trigger)
            .cloned()
            .collect()
    }

    pub fn definition(&self, reward_key: &str) -> Option<&RewardDefinition> {
        self.definitions
            .iter()
            .find(|definition| definition.key == reward_key)
    }

    pub fn handler(&self, reward_key: &str) -> Option<Arc<dyn RewardHandler>> {
        self.handlers.get(reward_key).cloned()
    }
}

/// Credits a fixed amount to the recipient's wallet.
#[derive(Debug, Clone)]
pub struct WalletCreditReward {
    pub wallet_type: String,
    pub amount: BigDecimal,
}

impl WalletCreditReward {
    pub fn new(wallet_type: impl Into<String>, amount: BigDecimal) -> Self {
        Self {
            wallet_type: wallet_type.into(),
            amount,
        }
    }
}

#[async_trait]
impl RewardHandler for WalletCreditReward {
    async fn execute(
        &self,
        conn: &mut PgConnection,
        ctx: &RewardContext<'_>,
    ) -> anyhow::Result<serde_json::Value> {
        let change = BalanceChange::new(
            ctx.recipient_user_id,
            self.wallet_type.clone(),
            self.amount.clone(),
            CHANGE_REWARD,
            SOURCE_REFERRAL_REWARD,
        )
        .with_batch(ctx.referral.id)
        .with_reason(ctx.reward_key)
        .with_meta(json!({
            "rewardKey": ctx.reward_key,
            "referralId": ctx.referral.id,
            "trigger": ctx.trigger,
        }));

        let entry = Ledger::new(conn).adjust_balance(&change).await?;

        Ok(json!({
            "walletType": self.wallet_type,
            "amount": self.amount.to_string(),
            "walletHistoryId": entry.history.id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct NoopReward;

    #[async_trait]
    impl RewardHandler for NoopReward {
        async fn execute(
            &self,
            _conn: &mut PgConnection,
            _ctx: &RewardContext<'_>,
        ) -> anyhow::Result<serde_json::Value> {
            Ok(json!({}))
        }
    }

    fn sample_referral() -> Referral {
        Referral {
            id: Uuid::new_v4(),
            inviter_user_id: Uuid::new_v4(),
            invitee_user_id: Uuid::new_v4(),
            coupon_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_recipient_role() {
        let referral = sample_referral();
        assert_eq!(
            RecipientRole::Inviter.recipient(&referral),
            referral.inviter_user_id
        );
        assert_eq!(
            RecipientRole::Invitee.recipient(&referral),
            referral.invitee_user_id
        );
    }

    #[test]
    fn test_definitions_filtered_by_trigger() {
        let mut registry = RewardRegistry::new();
        registry.register_definition(RewardDefinition::new(
            "inviter_bonus",
            TRIGGER_REFERRAL_CREATED,
            RecipientRole::Inviter,
        ));
        registry.register_definition(RewardDefinition::new(
            "first_purchase_bonus",
            TRIGGER_PURCHASE_COMPLETED,
            RecipientRole::Inviter,
        ));
        registry.register_definition(RewardDefinition::new(
            "invitee_bonus",
            TRIGGER_REFERRAL_CREATED,
            RecipientRole::Invitee,
        ));

        let keys: Vec<String> = registry
            .definitions_for(TRIGGER_REFERRAL_CREATED)
            .into_iter()
            .map(|d| d.key)
            .collect();
        assert_eq!(keys, vec!["inviter_bonus", "invitee_bonus"]);
        assert!(registry.definitions_for("unknown").is_empty());
    }

    #[test]
    fn test_duplicate_definition_replaces_in_place() {
        let mut registry = RewardRegistry::new();
        registry.register_definition(RewardDefinition::new(
            "bonus",
            TRIGGER_REFERRAL_CREATED,
            RecipientRole::Inviter,
        ));
        registry.register_definition(RewardDefinition::new(
            "other",
            TRIGGER_REFERRAL_CREATED,
            RecipientRole::Inviter,
        ));
        registry.register_definition(RewardDefinition::new(
            "bonus",
            TRIGGER_REFERRAL_CREATED,
            RecipientRole::Invitee,
        ));

        let definitions = registry.definitions_for(TRIGGER_REFERRAL_CREATED);
        assert_eq!(definitions.len(), 2);
        assert_eq!(definitions[0].key, "bonus");
        assert_eq!(definitions[0].recipient_role, RecipientRole::Invitee);
    }

    #[test]
    fn test_handler_lookup() {
        let mut registry = RewardRegistry::new();
        registry.register_handler("bonus", Arc::new(NoopReward));
        registry.register_handler("bonus", Arc::new(NoopReward));
        assert!(registry.handler("bonus").is_some());
        assert!(registry.handler("missing").is_none());
    }
}
