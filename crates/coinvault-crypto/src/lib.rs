// CoinVault Crypto - Hashing and webhook signing primitives for the purchase engine

pub mod fingerprint;
pub mod webhook;

pub use fingerprint::{payload_fingerprint, FINGERPRINT_PREFIX};
pub use webhook::{
    format_signature_header, parse_signature_header, sign_webhook_payload,
    verify_webhook_signature, SignatureHeader, DEFAULT_TOLERANCE_SECS,
};
