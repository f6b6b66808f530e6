//! Webhook signature verification.
//!
//! The gateway signs each notification with HMAC-SHA256 over the manifest
//! `id:<data.id>;request-id:<x-request-id>;ts:<ts>;` and sends
//! `x-signature: ts=<ts>,v1=<hex digest>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("malformed signature header: {0}")]
    Malformed(String),
    #[error("webhook signature mismatch")]
    Mismatch,
}

/// Parsed `x-signature` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub ts: String,
    pub v1: String,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Result<Self, SignatureError> {
        let mut ts = None;
        let mut v1 = None;
        for part in header.split(',') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            match key.trim() {
                "ts" => ts = Some(value.trim().to_string()),
                "v1" => v1 = Some(value.trim().to_string()),
                _ => {}
            }
        }
        match (ts, v1) {
            (Some(ts), Some(v1)) if !ts.is_empty() && !v1.is_empty() => Ok(Self { ts, v1 }),
            _ => Err(SignatureError::Malformed(
                "expected ts=<timestamp>,v1=<digest>".to_string(),
            )),
        }
    }
}

fn manifest(data_id: &str, request_id: &str, ts: &str) -> String {
    format!(
        "id:{};request-id:{request_id};ts:{ts};",
        data_id.to_ascii_lowercase()
    )
}

fn mac_for(secret: &[u8], message: &str) -> Result<HmacSha256, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| SignatureError::Malformed(format!("unusable secret: {e}")))?;
    mac.update(message.as_bytes());
    Ok(mac)
}

/// Verify a notification signature in constant time.
pub fn verify(
    secret: &str,
    header: &str,
    request_id: &str,
    data_id: &str,
) -> Result<(), SignatureError> {
    let parsed = SignatureHeader::parse(header)?;
    let provided = hex::decode(&parsed.v1)
        .map_err(|e| SignatureError::Malformed(format!("invalid hex digest: {e}")))?;
    mac_for(secret.as_bytes(), &manifest(data_id, request_id, &parsed.ts))?
        .verify_slice(&provided)
        .map_err(|_| SignatureError::Mismatch)
}

/// Produce the header value the gateway would send. Used by tests and by
/// operators replaying notifications.
pub fn sign(secret: &str, request_id: &str, data_id: &str, ts: &str) -> Result<String, SignatureError> {
    let digest = mac_for(secret.as_bytes(), &manifest(data_id, request_id, ts))?
        .finalize()
        .into_bytes();
    Ok(format!("ts={ts},v1={}", hex::encode(digest)))
}
