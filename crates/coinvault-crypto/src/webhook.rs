// HMAC-SHA256 signatures for payment webhooks
//
// The signed content is `{timestamp}.{raw_body}` and the header carries
// `t=<unix seconds>,v1=<lowercase hex hmac>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted clock skew between the provider and us, in seconds.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Parsed form of a webhook signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

fn mac_for(secret: &[u8], timestamp: i64, body: &[u8]) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Some(mac)
}

/// Signs a raw webhook body and returns the hex-encoded HMAC.
pub fn sign_webhook_payload(secret: &[u8], timestamp: i64, body: &[u8]) -> Option<String> {
    let mac = mac_for(secret, timestamp, body)?;
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Builds the header value for a signed payload.
pub fn format_signature_header(secret: &[u8], timestamp: i64, body: &[u8]) -> Option<String> {
    let signature = sign_webhook_payload(secret, timestamp, body)?;
    Some(format!("t={},v1={}", timestamp, signature))
}

/// Parses `t=...,v1=...[,v1=...]`.
///
/// Returns `None` when the timestamp is missing or malformed or no `v1` entry is present.
pub fn parse_signature_header(header: &str) -> Option<SignatureHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => signatures.push(value.to_string()),
            _ => {}
        }
    }

    if signatures.is_empty() {
        return None;
    }

    Some(SignatureHeader {
        timestamp: timestamp?,
        signatures,
    })
}

/// Verifies a signature header against the raw body.
///
/// Any `v1` entry matching is accepted, which allows secret rotation on the provider side.
/// Timestamps further than `tolerance_secs` from `now` are rejected.
pub fn verify_webhook_signature(
    secret: &[u8],
    header: &str,
    body: &[u8],
    now: i64,
    tolerance_secs: i64,
) -> bool {
    let Some(parsed) = parse_signature_header(header) else {
        return false;
    };

    if (now - parsed.timestamp).abs() > tolerance_secs {
        return false;
    }

    parsed.signatures.iter().any(|candidate| {
        let Ok(expected) = hex::decode(candidate) else {
            return false;
        };
        mac_for(secret, parsed.timestamp, body)
            .map(|mac| mac.verify_slice(&expected).is_ok())
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"whsec_test_secret";
    const BODY: &[u8] = br#"{"type":"payment.succeeded","sessionId":"cs_1"}"#;

    #[test]
    fn test_signature_is_hex() {
        let sig = sign_webhook_payload(SECRET, 1_700_000_000, BODY).unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_parse_header() {
        let parsed = parse_signature_header("t=1700000000,v1=abcd,v1=ef01").unwrap();
        assert_eq!(parsed.timestamp, 1_700_000_000);
        assert_eq!(parsed.signatures, vec!["abcd", "ef01"]);
    }

    #[test]
    fn test_parse_header_missing_parts() {
        assert!(parse_signature_header("v1=abcd").is_none());
        assert!(parse_signature_header("t=1700000000").is_none());
        assert!(parse_signature_header("t=soon,v1=abcd").is_none());
        assert!(parse_signature_header("garbage").is_none());
    }

    #[test]
    fn test_verify_accepts_valid_signature() {
        let header = format_signature_header(SECRET, 1_700_000_000, BODY).unwrap();
        assert!(verify_webhook_signature(
            SECRET,
            &header,
            BODY,
            1_700_000_010,
            DEFAULT_TOLERANCE_SECS
        ));
    }

    #[test]
    fn test_verify_rejects_tampered_body() {
        let header = format_signature_header(SECRET, 1_700_000_000, BODY).unwrap();
        let tampered = br#"{"type":"payment.succeeded","sessionId":"cs_2"}"#;
        assert!(!verify_webhook_signature(
            SECRET,
            &header,
            tampered,
            1_700_000_000,
            DEFAULT_TOLERANCE_SECS
        ));
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let header = format_signature_header(b"other", 1_700_000_000, BODY).unwrap();
        assert!(!verify_webhook_signature(
            SECRET,
            &header,
            BODY,
            1_700_000_000,
            DEFAULT_TOLERANCE_SECS
        ));
    }

    #[test]
    fn test_verify_rejects_stale_timestamp() {
        let header = format_signature_header(SECRET, 1_700_000_000, BODY).unwrap();
        assert!(!verify_webhook_signature(
            SECRET,
            &header,
            BODY,
            1_700_000_000 + DEFAULT_TOLERANCE_SECS + 1,
            DEFAULT_TOLERANCE_SECS
        ));
    }

    #[test]
    fn test_verify_accepts_any_rotated_signature() {
        let good = sign_webhook_payload(SECRET, 1_700_000_000, BODY).unwrap();
        let header = format!("t=1700000000,v1=deadbeef,v1={}", good);
        assert!(verify_webhook_signature(
            SECRET,
            &header,
            BODY,
            1_700_000_000,
            DEFAULT_TOLERANCE_SECS
        ));
    }
}
