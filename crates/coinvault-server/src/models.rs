//! Database models for the purchase engine.

pub mod coupon;
pub mod purchase_request;
pub mod referral;
pub mod referral_reward;
pub mod wallet;
pub mod wallet_history;
pub mod wallet_reservation;

pub use coupon::{Coupon, CouponStatus, CATEGORY_PURCHASE_DISCOUNT, CATEGORY_REFERRAL};
pub use purchase_request::{NewPurchaseRequest, PurchaseRequest, PurchaseStatus};
pub use referral::Referral;
pub use referral_reward::{ReferralReward, RewardStatus};
pub use wallet::Wallet;
pub use wallet_history::WalletHistory;
pub use wallet_reservation::{ReservationStatus, WalletReservation};
