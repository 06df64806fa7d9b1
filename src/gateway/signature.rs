//! Signed webhook verification.
//!
//! The signature header has the form `t=<unix seconds>,v1=<hex>[,v1=<hex>...]`.
//! Each `v1` value is HMAC-SHA256 over `"<t>.<raw body>"` keyed with the
//! endpoint secret. Verification must run on the raw bytes, before any JSON
//! parsing.

use std::time::Duration;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Malformed signature header")]
    MalformedHeader,
    #[error("No signature matches the payload")]
    NoMatchingSignature,
    #[error("Signature timestamp outside the {0:?} tolerance")]
    OutsideTolerance(Duration),
}

/// A verified inbound gateway event. `object` is kept raw; the reconciliation
/// handler decodes it per event type.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GatewayEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: i64,
    pub data: EventData,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

fn mac_for(payload: &[u8], secret: &str, timestamp: &str) -> HmacSha256 {
    // HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac key of any length is valid"));
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac
}

/// Produces a header value the gateway would send for `payload`.
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let tag = mac_for(payload, secret, &timestamp.to_string())
        .finalize()
        .into_bytes();
    format!("t={timestamp},v1={}", hex::encode(tag))
}

pub fn verify(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance: Duration,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", t)) => timestamp = Some(t),
            Some(("v1", s)) => signatures.push(s),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(SignatureError::MalformedHeader)?;
    if signatures.is_empty() {
        return Err(SignatureError::MalformedHeader);
    }
    let sent_at: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::MalformedHeader)?;

    let mac = mac_for(payload, secret, timestamp);
    let matched = signatures.iter().any(|candidate| {
        hex::decode(candidate).is_ok_and(|bytes| mac.clone().verify_slice(&bytes).is_ok())
    });
    if !matched {
        return Err(SignatureError::NoMatchingSignature);
    }
    if now.abs_diff(sent_at) > tolerance.as_secs() {
        return Err(SignatureError::OutsideTolerance(tolerance));
    }
    Ok(())
}

/// Decodes an already verified payload. A body that fails here was still
/// sent by the gateway, so this is not a signature error.
pub fn decode_event(payload: &[u8]) -> Result<GatewayEvent, serde_json::Error> {
    serde_json::from_slice(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"id":"evt_1","type":"transfer.created","data":{"object":{"id":"tr_1"}}}"#;
    const FIVE_MIN: Duration = Duration::from_secs(300);

    #[test]
    fn signed_payload_verifies_and_decodes() {
        let header = sign(BODY, SECRET, 1_700_000_000);
        verify(BODY, &header, SECRET, FIVE_MIN, 1_700_000_010).unwrap();
        let event = decode_event(BODY).unwrap();
        assert_eq!(event.id, "evt_1");
        assert_eq!(event.event_type, "transfer.created");
        assert_eq!(event.data.object["id"], "tr_1");
    }

    #[test]
    fn tampered_body_is_rejected() {
        let header = sign(BODY, SECRET, 1_700_000_000);
        let tampered = br#"{"id":"evt_1","type":"transfer.failed","data":{"object":{"id":"tr_1"}}}"#;
        assert_eq!(
            verify(tampered, &header, SECRET, FIVE_MIN, 1_700_000_000),
            Err(SignatureError::NoMatchingSignature)
        );
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let header = sign(BODY, "whsec_other", 1_700_000_000);
        assert_eq!(
            verify(BODY, &header, SECRET, FIVE_MIN, 1_700_000_000),
            Err(SignatureError::NoMatchingSignature)
        );
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let header = sign(BODY, SECRET, 1_700_000_000);
        assert_eq!(
            verify(BODY, &header, SECRET, FIVE_MIN, 1_700_000_301),
            Err(SignatureError::OutsideTolerance(FIVE_MIN))
        );
    }

    #[test]
    fn any_matching_v1_is_accepted() {
        let good = sign(BODY, SECRET, 1_700_000_000);
        let good_sig = good.split_once("v1=").unwrap().1;
        let header = format!("t=1700000000,v1=deadbeef,v1={good_sig}");
        assert!(verify(BODY, &header, SECRET, FIVE_MIN, 1_700_000_000).is_ok());
    }

    #[test]
    fn signed_body_without_data_verifies_but_does_not_decode() {
        let body = br#"{"id":"evt_1","type":"payout.paid"}"#;
        let header = sign(body, SECRET, 1_700_000_000);
        assert!(verify(body, &header, SECRET, FIVE_MIN, 1_700_000_000).is_ok());
        assert!(decode_event(body).is_err());
    }

    #[test]
    fn header_without_timestamp_is_malformed() {
        assert_eq!(
            verify(BODY, "v1=abcd", SECRET, FIVE_MIN, 0),
            Err(SignatureError::MalformedHeader)
        );
    }
}
