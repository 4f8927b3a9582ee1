// Request fingerprints for idempotent retries

use anyhow::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Prefix naming the digest, stored with the fingerprint so it can change later.
pub const FINGERPRINT_PREFIX: &str = "sha256:";

/// Computes a stable `sha256:<hex>` fingerprint over the canonical JSON of `payload`.
///
/// The payload is canonicalized with JCS (RFC 8785): object keys are sorted and whitespace
/// is dropped, so a retry that sends the same fields in another order gets the same
/// fingerprint. Callers normalize values (e.g. decimal scale) before fingerprinting.
pub fn payload_fingerprint<T: Serialize>(payload: &T) -> Result<String> {
    let canonical = serde_jcs::to_string(payload)?;
    let digest = Sha256::digest(canonical.as_bytes());
    Ok(format!("{}{}", FINGERPRINT_PREFIX, hex::encode(digest)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_of_known_payloads() {
        assert_eq!(
            payload_fingerprint(&json!({})).unwrap(),
            "sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
        assert_eq!(
            payload_fingerprint(&json!({"walletType": "regular_coin", "amount": "1000"}))
                .unwrap(),
            "sha256:764a1e02bbd9eb73f70652094226368f775f22db5f7ec11b576bbb0228701eb3"
        );
    }

    #[test]
    fn test_fingerprint_has_prefix_and_length() {
        let fp = payload_fingerprint(&json!({"amount": "1000"})).unwrap();
        assert!(fp.starts_with(FINGERPRINT_PREFIX));
        assert_eq!(fp.len(), FINGERPRINT_PREFIX.len() + 64);
        assert!(fp[FINGERPRINT_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a = payload_fingerprint(&json!({
            "userId": "u1",
            "coupon": {"code": "WELCOME", "category": "purchase_discount"},
            "amount": "1000",
        }))
        .unwrap();
        let b = payload_fingerprint(&json!({
            "amount": "1000",
            "coupon": {"category": "purchase_discount", "code": "WELCOME"},
            "userId": "u1",
        }))
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_changes_with_payload() {
        let a = payload_fingerprint(&json!({"amount": "1000"})).unwrap();
        let b = payload_fingerprint(&json!({"amount": "1001"})).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_missing_coupon_differs_from_absent_field() {
        let with_null = payload_fingerprint(&json!({"amount": "5", "couponCode": null})).unwrap();
        let without = payload_fingerprint(&json!({"amount": "5"})).unwrap();
        assert_ne!(with_null, without);
    }

    #[test]
    fn test_struct_payload_matches_equivalent_json() {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Purchase<'a> {
            wallet_type: &'a str,
            amount: &'a str,
        }

        let from_struct = payload_fingerprint(&Purchase {
            wallet_type: "regular_coin",
            amount: "1000",
        })
        .unwrap();
        let from_json =
            payload_fingerprint(&json!({"amount": "1000", "walletType": "regular_coin"})).unwrap();
        assert_eq!(from_struct, from_json);
    }
}
