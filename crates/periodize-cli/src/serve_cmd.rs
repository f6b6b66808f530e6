//! `periodize serve`: the HTTP API in front of the plan service and the
//! payment reconciler.
//!
//! Authentication is done by a proxy in front of this service, which sets
//! `x-owner-identity` (and optionally `x-owner-role`) on every request.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use periodize_core::payment::signature;
use periodize_core::payment::{CreatePayment, CreatedPayment, Reconciler, WebhookNotification};
use periodize_core::plan::{NewPlanRequest, PlanService, PlanView};
use periodize_core::{Caller, Role, ServiceError};
use periodize_db::models::{Discipline, Payment};

pub const IDENTITY_HEADER: &str = "x-owner-identity";
pub const ROLE_HEADER: &str = "x-owner-role";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn internal(err: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{err:#}"), "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::IllegalState(_) => StatusCode::CONFLICT,
            ServiceError::Invalid(_) => StatusCode::BAD_REQUEST,
            ServiceError::RetryShortly(_) => StatusCode::TOO_MANY_REQUESTS,
            ServiceError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        match err {
            ServiceError::Internal(e) => Self::internal(e),
            other => Self::new(status, other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlanBody {
    pub plan_id: Option<String>,
    pub discipline: Discipline,
    pub athlete: serde_json::Value,
    pub plan_duration: i32,
    pub start_date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentBody {
    pub plan_id: Option<String>,
    pub amount_cents: Option<i64>,
    pub description: Option<String>,
    pub method: Option<String>,
    pub payer_email: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentView {
    pub external_reference: String,
    pub gateway_payment_id: Option<String>,
    pub gateway_preference_id: Option<String>,
    pub plan_id: Option<String>,
    pub amount_cents: i64,
    pub description: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<Payment> for PaymentView {
    fn from(p: Payment) -> Self {
        Self {
            external_reference: p.external_reference,
            gateway_payment_id: p.gateway_payment_id,
            gateway_preference_id: p.gateway_preference_id,
            plan_id: p.plan_id,
            amount_cents: p.amount_cents,
            description: p.description,
            status: p.status,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedPaymentView {
    #[serde(flatten)]
    pub payment: PaymentView,
    pub reused: bool,
    pub redirect_url: Option<String>,
    pub pix_qr_code: Option<String>,
    pub pix_qr_code_base64: Option<String>,
}

impl From<CreatedPayment> for CreatedPaymentView {
    fn from(c: CreatedPayment) -> Self {
        Self {
            payment: c.payment.into(),
            reused: c.reused,
            redirect_url: c.redirect_url,
            pix_qr_code: c.pix_qr_code,
            pix_qr_code_base64: c.pix_qr_code_base64,
        }
    }
}

// ---------------------------------------------------------------------------
// State and router
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub plans: PlanService,
    pub reconciler: Arc<Reconciler>,
    pub webhook_secret: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/plans", post(create_plan).get(list_plans))
        .route("/api/plans/{id}", get(get_plan))
        .route("/api/plans/{id}/generate", post(generate_plan))
        .route("/api/payments", post(create_payment).get(list_payments))
        .route("/api/payments/status/{reference}", get(payment_status))
        .route("/api/payments/webhook", post(webhook))
        .route(
            "/api/payments/simulate-approval/{reference}",
            post(simulate_approval),
        )
        .route("/api/payments/recovery/{plan_id}", get(recover_payment))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(state: AppState, bind: &str, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("periodize serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("periodize serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

// ---------------------------------------------------------------------------
// Caller identity
// ---------------------------------------------------------------------------

fn caller_from(headers: &HeaderMap) -> Result<Caller, AppError> {
    let identity = headers
        .get(IDENTITY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::unauthorized(format!("missing {IDENTITY_HEADER} header")))?;

    let role = match headers.get(ROLE_HEADER).and_then(|v| v.to_str().ok()) {
        Some(raw) => raw.parse::<Role>().map_err(AppError::bad_request)?,
        None => Role::Owner,
    };

    Ok(Caller {
        identity: identity.to_string(),
        role,
    })
}

// ---------------------------------------------------------------------------
// Handlers: plans
// ---------------------------------------------------------------------------

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn create_plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreatePlanBody>,
) -> Result<axum::response::Response, AppError> {
    let caller = caller_from(&headers)?;
    let plan = state
        .plans
        .create_pending_plan(
            &caller,
            NewPlanRequest {
                plan_id: body.plan_id,
                discipline: body.discipline,
                athlete: body.athlete,
                duration_weeks: body.plan_duration,
                start_date: body.start_date,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(PlanView::from(plan))).into_response())
}

async fn list_plans(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<axum::response::Response, AppError> {
    let caller = caller_from(&headers)?;
    let plans = state.plans.list_plans_for(&caller).await?;
    let views: Vec<PlanView> = plans.into_iter().map(PlanView::from).collect();
    Ok(Json(views).into_response())
}

async fn get_plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let caller = caller_from(&headers)?;
    let plan = state.plans.get_plan_for(&id, &caller).await?;
    Ok(Json(PlanView::from(plan)).into_response())
}

async fn generate_plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let caller = caller_from(&headers)?;
    let plan = state.plans.request_generation(&id, &caller).await?;
    Ok((StatusCode::ACCEPTED, Json(PlanView::from(plan))).into_response())
}

// ---------------------------------------------------------------------------
// Handlers: payments
// ---------------------------------------------------------------------------

async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreatePaymentBody>,
) -> Result<axum::response::Response, AppError> {
    let caller = caller_from(&headers)?;
    let created = state
        .reconciler
        .create_payment(
            &caller,
            CreatePayment {
                plan_id: body.plan_id,
                amount_cents: body.amount_cents,
                description: body.description,
                method: body.method,
                payer_email: body.payer_email,
            },
        )
        .await?;
    let status = if created.reused {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(CreatedPaymentView::from(created))).into_response())
}

async fn list_payments(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<axum::response::Response, AppError> {
    let caller = caller_from(&headers)?;
    let payments = state.reconciler.list_payments_for_owner(&caller).await?;
    let views: Vec<PaymentView> = payments.into_iter().map(PaymentView::from).collect();
    Ok(Json(views).into_response())
}

async fn payment_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(reference): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let caller = caller_from(&headers)?;
    let payment = state.reconciler.check_status(&reference, &caller).await?;
    Ok(Json(PaymentView::from(payment)).into_response())
}

async fn recover_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(plan_id): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let caller = caller_from(&headers)?;
    let payment = state.reconciler.recover_for_plan(&plan_id, &caller).await?;
    Ok(Json(PaymentView::from(payment)).into_response())
}

async fn simulate_approval(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(reference): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let caller = caller_from(&headers)?;
    let payment = state
        .reconciler
        .simulate_approval(&reference, &caller)
        .await?;
    Ok(Json(PaymentView::from(payment)).into_response())
}

/// Gateway notification receiver. Answers 200 for every notification it
/// processed or chose to ignore, so the gateway stops retrying.
async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<axum::response::Response, AppError> {
    let notification: WebhookNotification = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request(format!("invalid notification body: {e}")))?;

    if let Some(secret) = state.webhook_secret.as_deref() {
        let data_id = query
            .get("data.id")
            .map(String::as_str)
            .or_else(|| notification.data.as_ref().map(|d| d.id.as_str()))
            .unwrap_or_default();
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
        };
        if let Err(e) = signature::verify(
            secret,
            header("x-signature"),
            header("x-request-id"),
            data_id,
        ) {
            tracing::warn!(error = %e, data_id, "rejected webhook with bad signature");
            return Err(AppError::unauthorized("invalid webhook signature"));
        }
    }

    let result = state
        .reconciler
        .handle_webhook(&notification)
        .await
        .map_err(AppError::internal)?;

    let body = match result {
        Some(payment) => serde_json::json!({
            "status": "processed",
            "externalReference": payment.external_reference,
            "paymentStatus": payment.status,
        }),
        None => serde_json::json!({ "status": "ignored" }),
    };
    Ok(Json(body).into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
