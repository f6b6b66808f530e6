//! [`Gateway`] implementation speaking the MercadoPago REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use uuid::Uuid;

use super::{
    CheckoutPreference, DirectPayment, Gateway, GatewayError, GatewayPayment, PaymentOrder,
    string_or_number,
};

pub const DEFAULT_BASE_URL: &str = "https://api.mercadopago.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const STATEMENT_DESCRIPTOR: &str = "PERIODIZE";

#[derive(Debug, Clone)]
pub struct MercadoPagoConfig {
    pub base_url: String,
    pub access_token: String,
    /// Public base URL of this service; notifications are sent to
    /// `<notification_base_url>/api/payments/webhook`.
    pub notification_base_url: String,
    pub timeout: Duration,
}

impl MercadoPagoConfig {
    pub fn new(access_token: impl Into<String>, notification_base_url: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            access_token: access_token.into(),
            notification_base_url: notification_base_url.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DirectPaymentResponse {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    status: String,
    point_of_interaction: Option<PointOfInteraction>,
}

#[derive(Debug, Deserialize)]
struct PointOfInteraction {
    transaction_data: Option<TransactionData>,
}

#[derive(Debug, Deserialize)]
struct TransactionData {
    qr_code: Option<String>,
    qr_code_base64: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PreferenceResponse {
    id: String,
    init_point: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<GatewayPayment>,
}

/// Integer cents as the decimal amount the API expects.
fn decimal_amount(cents: i64) -> f64 {
    cents as f64 / 100.0
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct MercadoPagoClient {
    client: Client,
    config: MercadoPagoConfig,
}

impl MercadoPagoClient {
    pub fn new(config: MercadoPagoConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    /// Send an authenticated request and decode a successful JSON body.
    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        if self.config.access_token.is_empty() {
            return Err(GatewayError::MissingAccessToken);
        }
        let request = request.bearer_auth(&self.config.access_token);

        let call = async {
            let response = request
                .send()
                .await
                .map_err(|e| GatewayError::Transport(e.to_string()))?;
            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| GatewayError::Transport(e.to_string()))?;
            Ok::<_, GatewayError>((status, body))
        };
        let (status, body) = tokio::time::timeout(self.config.timeout, call)
            .await
            .map_err(|_| GatewayError::Timeout(self.config.timeout))??;

        if !status.is_success() {
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| GatewayError::Parse(e.to_string()))
    }
}

#[async_trait]
impl Gateway for MercadoPagoClient {
    async fn create_direct(&self, order: &PaymentOrder<'_>) -> Result<DirectPayment, GatewayError> {
        let body = json!({
            "transaction_amount": decimal_amount(order.amount_cents),
            "description": order.description,
            "payment_method_id": "pix",
            "payer": { "email": order.payer_email },
            "external_reference": order.external_reference,
        });
        let request = self
            .client
            .post(self.url("/v1/payments"))
            .header("X-Idempotency-Key", Uuid::new_v4().to_string())
            .json(&body);

        let created: DirectPaymentResponse = self.execute(request).await?;
        let data = created
            .point_of_interaction
            .and_then(|p| p.transaction_data);
        let (qr_code, qr_code_base64) = match data {
            Some(d) => (d.qr_code, d.qr_code_base64),
            None => (None, None),
        };

        tracing::info!(
            gateway_payment_id = %created.id,
            external_reference = order.external_reference,
            status = %created.status,
            "direct payment created"
        );
        Ok(DirectPayment {
            id: created.id,
            status: created.status,
            qr_code,
            qr_code_base64,
        })
    }

    async fn create_checkout(
        &self,
        order: &PaymentOrder<'_>,
    ) -> Result<CheckoutPreference, GatewayError> {
        let notification_url = format!(
            "{}/api/payments/webhook",
            self.config.notification_base_url.trim_end_matches('/')
        );
        let body = json!({
            "items": [{
                "title": order.description,
                "quantity": 1,
                "currency_id": "BRL",
                "unit_price": decimal_amount(order.amount_cents),
            }],
            "payer": { "email": order.payer_email },
            "external_reference": order.external_reference,
            "payment_methods": {
                "excluded_payment_types": [{ "id": "ticket" }],
                "installments": 1,
            },
            "statement_descriptor": STATEMENT_DESCRIPTOR,
            "notification_url": notification_url,
        });
        let request = self
            .client
            .post(self.url("/checkout/preferences"))
            .json(&body);

        let created: PreferenceResponse = self.execute(request).await?;
        tracing::info!(
            preference_id = %created.id,
            external_reference = order.external_reference,
            "checkout preference created"
        );
        Ok(CheckoutPreference {
            id: created.id,
            redirect_url: created.init_point,
        })
    }

    async fn get_payment(&self, id: &str) -> Result<GatewayPayment, GatewayError> {
        let request = self.client.get(self.url(&format!("/v1/payments/{id}")));
        self.execute(request).await
    }

    async fn search_by_reference(
        &self,
        external_reference: &str,
    ) -> Result<Vec<GatewayPayment>, GatewayError> {
        let request = self
            .client
            .get(self.url("/v1/payments/search"))
            .query(&[("external_reference", external_reference)]);
        let found: SearchResponse = self.execute(request).await?;
        Ok(found.results)
    }
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;

    use super::*;

    fn client(url: String) -> MercadoPagoClient {
        let mut config = MercadoPagoConfig::new("TEST-TOKEN", "https://periodize.example.com/");
        config.base_url = url;
        MercadoPagoClient::new(config)
    }

    fn order() -> PaymentOrder<'static> {
        PaymentOrder {
            amount_cents: 990,
            description: "Training plan",
            payer_email: "ana@example.com",
            external_reference: "EXT1",
        }
    }

    #[tokio::test]
    async fn create_direct_sends_pix_payment() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/payments")
            .match_header("authorization", "Bearer TEST-TOKEN")
            .match_header("x-idempotency-key", Matcher::Any)
            .match_body(Matcher::PartialJson(json!({
                "transaction_amount": 9.9,
                "payment_method_id": "pix",
                "payer": { "email": "ana@example.com" },
                "external_reference": "EXT1"
            })))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"id": 1234567890, "status": "pending",
                    "point_of_interaction": {"transaction_data":
                        {"qr_code": "000201...", "qr_code_base64": "iVBOR..."}}}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let created = client(server.url()).create_direct(&order()).await.unwrap();
        assert_eq!(created.id, "1234567890");
        assert_eq!(created.status, "pending");
        assert_eq!(created.qr_code.as_deref(), Some("000201..."));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn create_checkout_sets_notification_url() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/checkout/preferences")
            .match_body(Matcher::PartialJson(json!({
                "external_reference": "EXT1",
                "payment_methods": { "installments": 1 },
                "notification_url": "https://periodize.example.com/api/payments/webhook"
            })))
            .with_status(201)
            .with_body(r#"{"id": "pref-1", "init_point": "https://mp.example/checkout?pref=pref-1"}"#)
            .expect(1)
            .create_async()
            .await;

        let created = client(server.url()).create_checkout(&order()).await.unwrap();
        assert_eq!(created.id, "pref-1");
        assert_eq!(created.redirect_url, "https://mp.example/checkout?pref=pref-1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn get_payment_reads_status_and_reference() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/payments/42")
            .with_status(200)
            .with_body(r#"{"id": 42, "status": "approved", "external_reference": "EXT1"}"#)
            .create_async()
            .await;

        let payment = client(server.url()).get_payment("42").await.unwrap();
        assert_eq!(payment.id, "42");
        assert_eq!(payment.status, "approved");
        assert_eq!(payment.external_reference.as_deref(), Some("EXT1"));
    }

    #[tokio::test]
    async fn search_by_reference_returns_results() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/payments/search")
            .match_query(Matcher::UrlEncoded(
                "external_reference".into(),
                "EXT1".into(),
            ))
            .with_status(200)
            .with_body(r#"{"results": [{"id": 7, "status": "in_process"}], "paging": {"total": 1}}"#)
            .create_async()
            .await;

        let results = client(server.url()).search_by_reference("EXT1").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "7");
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/payments/42")
            .with_status(404)
            .with_body(r#"{"message": "Payment not found"}"#)
            .create_async()
            .await;

        let err = client(server.url()).get_payment("42").await.unwrap_err();
        assert!(matches!(err, GatewayError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn missing_token_fails_without_a_request() {
        let mut config = MercadoPagoConfig::new("", "https://periodize.example.com");
        config.base_url = "http://127.0.0.1:9".to_string();
        let err = MercadoPagoClient::new(config)
            .get_payment("42")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::MissingAccessToken));
    }
}
