//! Payments: the gateway seam, webhook signatures and the reconciler that
//! keeps stored payments and plans in step with the gateway.

pub mod mercadopago;
pub mod reconciler;
pub mod signature;

pub use mercadopago::{MercadoPagoClient, MercadoPagoConfig};
pub use reconciler::{
    CreatePayment, CreatedPayment, Reconciler, ReconcilerConfig, ReconcileSource,
};

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer};

// ---------------------------------------------------------------------------
// Gateway types
// ---------------------------------------------------------------------------

/// What a new gateway transaction charges and for whom.
#[derive(Debug, Clone)]
pub struct PaymentOrder<'a> {
    pub amount_cents: i64,
    pub description: &'a str,
    pub payer_email: &'a str,
    pub external_reference: &'a str,
}

/// A direct (PIX) payment as created by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectPayment {
    pub id: String,
    pub status: String,
    /// PIX copy-and-paste code.
    pub qr_code: Option<String>,
    pub qr_code_base64: Option<String>,
}

/// A hosted checkout the payer is redirected to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutPreference {
    pub id: String,
    pub redirect_url: String,
}

/// Authoritative state of one gateway payment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayPayment {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub external_reference: Option<String>,
    #[serde(default)]
    pub date_created: Option<String>,
}

impl GatewayPayment {
    pub fn created_at(&self) -> Option<DateTime<FixedOffset>> {
        self.date_created
            .as_deref()
            .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
    }
}

/// The most recent of several gateway payments, by creation date. Falls
/// back to the first entry when dates are missing.
pub fn most_recent(results: Vec<GatewayPayment>) -> Option<GatewayPayment> {
    if results.iter().all(|p| p.created_at().is_none()) {
        return results.into_iter().next();
    }
    results.into_iter().max_by_key(|p| p.created_at())
}

/// Gateway ids arrive as JSON numbers or strings.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

/// Body of a gateway notification.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookNotification {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub action: Option<String>,
    pub data: Option<WebhookData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
}

impl WebhookNotification {
    /// The gateway payment id, when this notification concerns a payment.
    pub fn payment_id(&self) -> Option<&str> {
        match (self.kind.as_deref(), &self.data) {
            (Some("payment"), Some(data)) => Some(data.id.as_str()),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Gateway trait
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway call timed out after {0:?}")]
    Timeout(Duration),
    #[error("gateway returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("gateway request failed: {0}")]
    Transport(String),
    #[error("unreadable gateway response: {0}")]
    Parse(String),
    #[error("gateway access token not configured")]
    MissingAccessToken,
}

/// Payment-processing service.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn create_direct(&self, order: &PaymentOrder<'_>) -> Result<DirectPayment, GatewayError>;

    async fn create_checkout(
        &self,
        order: &PaymentOrder<'_>,
    ) -> Result<CheckoutPreference, GatewayError>;

    async fn get_payment(&self, id: &str) -> Result<GatewayPayment, GatewayError>;

    async fn search_by_reference(
        &self,
        external_reference: &str,
    ) -> Result<Vec<GatewayPayment>, GatewayError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn Gateway) {}
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_payment_id_only_for_payments() {
        let n: WebhookNotification =
            serde_json::from_str(r#"{"type":"payment","action":"payment.updated","data":{"id":123456}}"#)
                .unwrap();
        assert_eq!(n.payment_id(), Some("123456"));

        let n: WebhookNotification =
            serde_json::from_str(r#"{"type":"merchant_order","data":{"id":"9"}}"#).unwrap();
        assert_eq!(n.payment_id(), None);

        let n: WebhookNotification = serde_json::from_str(r#"{"type":"payment"}"#).unwrap();
        assert_eq!(n.payment_id(), None);
    }

    #[test]
    fn most_recent_by_date() {
        let older = GatewayPayment {
            id: "1".into(),
            status: "rejected".into(),
            external_reference: None,
            date_created: Some("2026-01-10T10:00:00.000-03:00".into()),
        };
        let newer = GatewayPayment {
            id: "2".into(),
            status: "approved".into(),
            external_reference: None,
            date_created: Some("2026-01-10T10:05:00.000-03:00".into()),
        };
        let picked = most_recent(vec![older.clone(), newer]).unwrap();
        assert_eq!(picked.id, "2");

        let undated = GatewayPayment {
            date_created: None,
            ..older
        };
        let picked = most_recent(vec![undated.clone(), undated]).unwrap();
        assert_eq!(picked.id, "1");
        assert!(most_recent(vec![]).is_none());
    }
}
