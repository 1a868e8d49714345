//! Signed payment notifications.
//!
//! The processor signs each notification body with the shared webhook
//! secret. The `stripe-signature` header has the shape `t=<unix>,v1=<hex>`,
//! where the signature is HMAC-SHA256 over `"<t>.<body>"`.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("missing or malformed signature header")]
    MalformedHeader,

    #[error("signature timestamp outside tolerance")]
    Stale,

    #[error("signature mismatch")]
    Mismatch,

    #[error("unreadable notification body: {0}")]
    Body(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayNotification {
    /// Funds captured, or nothing was owed.
    CheckoutCompleted { session_id: String },
    /// The customer finished checkout but an asynchronous payment method has
    /// not settled yet. A later succeeded or failed notification follows.
    AwaitingPayment { session_id: String },
    CheckoutExpired { session_id: String },
    Ignored { kind: String },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    data: EnvelopeData,
}

#[derive(Deserialize)]
struct EnvelopeData {
    object: SessionObject,
}

#[derive(Deserialize)]
struct SessionObject {
    id: Option<String>,
    payment_status: Option<String>,
}

impl SessionObject {
    fn is_settled(&self) -> bool {
        matches!(
            self.payment_status.as_deref(),
            Some("paid") | Some("no_payment_required")
        )
    }
}

fn parse_header(header: &str) -> Option<(i64, Vec<Vec<u8>>)> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    match (timestamp, signatures.is_empty()) {
        (Some(t), false) => Some((t, signatures)),
        _ => None,
    }
}

/// Checks `header` against `payload`. Any `v1` entry may match.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: DateTime<Utc>,
    tolerance_secs: i64,
) -> Result<(), WebhookError> {
    let (timestamp, signatures) = parse_header(header).ok_or(WebhookError::MalformedHeader)?;

    if (now.timestamp() - timestamp).abs() > tolerance_secs {
        return Err(WebhookError::Stale);
    }

    for signature in &signatures {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| WebhookError::MalformedHeader)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        if mac.verify_slice(signature).is_ok() {
            return Ok(());
        }
    }

    Err(WebhookError::Mismatch)
}

pub fn parse_notification(payload: &[u8]) -> Result<GatewayNotification, WebhookError> {
    let envelope: Envelope =
        serde_json::from_slice(payload).map_err(|e| WebhookError::Body(e.to_string()))?;

    let session_id = || {
        envelope
            .data
            .object
            .id
            .clone()
            .ok_or_else(|| WebhookError::Body("session object has no id".to_string()))
    };

    match envelope.kind.as_str() {
        "checkout.session.completed" if envelope.data.object.is_settled() => {
            Ok(GatewayNotification::CheckoutCompleted {
                session_id: session_id()?,
            })
        }
        "checkout.session.completed" => Ok(GatewayNotification::AwaitingPayment {
            session_id: session_id()?,
        }),
        "checkout.session.async_payment_succeeded" => Ok(GatewayNotification::CheckoutCompleted {
            session_id: session_id()?,
        }),
        "checkout.session.expired" | "checkout.session.async_payment_failed" => {
            Ok(GatewayNotification::CheckoutExpired {
                session_id: session_id()?,
            })
        }
        other => Ok(GatewayNotification::Ignored {
            kind: other.to_string(),
        }),
    }
}

#[cfg(test)]
pub(crate) fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}
