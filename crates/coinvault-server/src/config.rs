//! Service configuration, read from the environment.

use bigdecimal::BigDecimal;
use chrono::Duration;
use serde::Deserialize;

use crate::payment_providers::PaymentError;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    /// `dummy` or `hosted`.
    pub payment_provider: String,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    pub checkout_base_url: String,
    /// May contain `{CHECKOUT_SESSION_ID}`.
    pub success_url: String,
    pub cancel_url: String,
    pub purchase_ttl_minutes: i64,
    pub expiry_sweep_interval_secs: u64,
    pub referral_wallet_type: String,
    pub referral_inviter_bonus: BigDecimal,
    pub referral_invitee_bonus: BigDecimal,
    pub referral_first_purchase_bonus: BigDecimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Dummy,
    Hosted,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .set_default("server_port", 8080)?
            .set_default("database_max_connections", 10)?
            .set_default("payment_provider", "dummy")?
            .set_default("checkout_base_url", "http://localhost:8080/checkout")?
            .set_default(
                "success_url",
                "http://localhost:3000/purchase/success?session_id={CHECKOUT_SESSION_ID}",
            )?
            .set_default("cancel_url", "http://localhost:3000/purchase/cancelled")?
            .set_default("purchase_ttl_minutes", 30)?
            .set_default("expiry_sweep_interval_secs", 60)?
            .set_default("referral_wallet_type", "regular_coin")?
            .set_default("referral_inviter_bonus", "100")?
            .set_default("referral_invitee_bonus", "50")?
            .set_default("referral_first_purchase_bonus", "200")?
            .add_source(config::Environment::default())
            .build()?;
        config.try_deserialize()
    }

    pub fn provider_kind(&self) -> Result<ProviderKind, PaymentError> {
        match self.payment_provider.to_ascii_lowercase().as_str() {
            "dummy" => Ok(ProviderKind::Dummy),
            "hosted" => Ok(ProviderKind::Hosted),
            other => Err(PaymentError::Configuration(format!(
                "Unsupported payment provider: {}. Supported: dummy, hosted",
                other
            ))),
        }
    }

    /// How long a new purchase request stays open.
    pub fn purchase_ttl(&self) -> Duration {
        Duration::minutes(self.purchase_ttl_minutes)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.expiry_sweep_interval_secs.max(1))
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        server_port: 8080,
        database_url: "postgres://localhost/coinvault_test".to_string(),
        database_max_connections: 10,
        payment_provider: "dummy".to_string(),
        webhook_secret: None,
        checkout_base_url: "http://localhost:8080/checkout".to_string(),
        success_url: "http://localhost/success?session_id={CHECKOUT_SESSION_ID}".to_string(),
        cancel_url: "http://localhost/cancel".to_string(),
        purchase_ttl_minutes: 30,
        expiry_sweep_interval_secs: 60,
        referral_wallet_type: "regular_coin".to_string(),
        referral_inviter_bonus: BigDecimal::from(100),
        referral_invitee_bonus: BigDecimal::from(50),
        referral_first_purchase_bonus: BigDecimal::from(200),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind() {
        let mut config = test_config();
        assert_eq!(config.provider_kind().unwrap(), ProviderKind::Dummy);

        config.payment_provider = "Hosted".to_string();
        assert_eq!(config.provider_kind().unwrap(), ProviderKind::Hosted);

        config.payment_provider = "stripe".to_string();
        assert!(config.provider_kind().is_err());
    }

    #[test]
    fn test_durations() {
        let mut config = test_config();
        assert_eq!(config.purchase_ttl(), Duration::minutes(30));

        config.expiry_sweep_interval_secs = 0;
        assert_eq!(config.sweep_interval(), std::time::Duration::from_secs(1));
    }

    #[test]
    fn test_hosted_provider_requires_secret() {
        let mut config = test_config();
        config.payment_provider = "hosted".to_string();
        assert!(crate::payment_providers::create_provider(&config).is_err());

        config.webhook_secret = Some("whsec".to_string());
        let provider = crate::payment_providers::create_provider(&config).unwrap();
        assert_eq!(provider.name(), "hosted");
    }
}
