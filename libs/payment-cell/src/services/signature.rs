// libs/payment-cell/src/services/signature.rs
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

use crate::models::WebhookError;

type HmacSha256 = Hmac<Sha256>;

/// Parsed `x-signature` header: `ts=<unix_ts>,v1=<hex_hmac>`.
#[derive(Debug)]
pub struct SignatureHeader {
    pub ts: i64,
    pub v1: Vec<u8>,
}

pub fn parse_signature_header(header: &str) -> Result<SignatureHeader, WebhookError> {
    let mut ts = None;
    let mut v1 = None;

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("ts", value)) => ts = value.parse::<i64>().ok(),
            Some(("v1", value)) => v1 = hex::decode(value).ok(),
            _ => {}
        }
    }

    match (ts, v1) {
        (Some(ts), Some(v1)) => Ok(SignatureHeader { ts, v1 }),
        _ => {
            debug!("malformed x-signature header");
            Err(WebhookError::InvalidSignature)
        }
    }
}

/// Recompute the provider's HMAC over its canonical manifest
/// `id:<data_id>;request-id:<request_id>;ts:<ts>;` and compare in constant
/// time. An empty secret never verifies: configuration absence rejects,
/// it does not bypass.
pub fn verify_signature(
    secret: &str,
    data_id: &str,
    request_id: &str,
    header: &str,
) -> Result<(), WebhookError> {
    if secret.is_empty() {
        return Err(WebhookError::NotConfigured);
    }

    let parsed = parse_signature_header(header)?;

    let manifest = format!("id:{};request-id:{};ts:{};", data_id, request_id, parsed.ts);

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::InvalidSignature)?;
    mac.update(manifest.as_bytes());

    // verify_slice is the constant-time comparison.
    mac.verify_slice(&parsed.v1).map_err(|_| {
        debug!("webhook signature verification failed");
        WebhookError::InvalidSignature
    })
}
