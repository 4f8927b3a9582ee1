//! CoinVault Server - purchase completion and wallet ledger
//!
//! Turns payment-provider confirmations into exactly-once wallet credits and runs the
//! side effects registered against completed purchases.

pub mod bootstrap;
pub mod config;
pub mod coupons;
pub mod db;
pub mod error;
pub mod hooks;
pub mod ledger;
pub mod milestones;
pub mod models;
pub mod payment_providers;
pub mod purchases;
pub mod referrals;
pub mod rewards;
pub mod routes;
pub mod sweeper;
pub mod webhooks;

pub use bootstrap::{register_all, Extensions};
pub use config::Config;
pub use error::AppError;
pub use purchases::{PurchaseRef, PurchaseService, PurchaseSettings};
pub use routes::create_router;
