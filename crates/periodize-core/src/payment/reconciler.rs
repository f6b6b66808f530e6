//! Payment Reconciler.
//!
//! Creates gateway transactions without double-charging, and converges the
//! stored payment (and the plan it pays for) to the gateway's view whether
//! the news arrives by webhook, by client poll, or both.
//!
//! Approval side effects (entitlement activation, `payment_pending ->
//! payment_approved` on the plan) are applied inside the transaction that
//! moves the locked payment row to `approved`, so they happen exactly once
//! per payment however many notifications race.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use periodize_db::models::{Payment, payment_status};
use periodize_db::queries::payments::{self, NewPayment};
use periodize_db::queries::plans as plan_db;
use periodize_db::queries::{creation_guards, entitlements};

use super::{Gateway, GatewayError, GatewayPayment, PaymentOrder, WebhookNotification, most_recent};
use crate::caller::Caller;
use crate::error::ServiceError;
use crate::state::dispatch;

pub const DEFAULT_AMOUNT_CENTS: i64 = 990;
pub const DEFAULT_DESCRIPTION: &str = "Training plan";

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// A creation marker younger than this blocks a second creation.
    pub guard_interval: Duration,
    /// The marker is removed this long after it was taken.
    pub guard_release_after: Duration,
    /// Open payments younger than this are returned instead of creating
    /// a new transaction.
    pub recency_window: Duration,
    pub entitlement_tier: String,
    pub entitlement_months: i32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            guard_interval: Duration::from_secs(5),
            guard_release_after: Duration::from_secs(30),
            recency_window: Duration::from_secs(10 * 60),
            entitlement_tier: "SINGLE_PLAN".to_string(),
            entitlement_months: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileSource {
    /// Identifier is the gateway payment id.
    Webhook,
    /// Identifier is the external reference.
    Poll,
}

impl std::fmt::Display for ReconcileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Webhook => f.write_str("webhook"),
            Self::Poll => f.write_str("poll"),
        }
    }
}

/// Parameters of a payment creation request.
#[derive(Debug, Clone, Default)]
pub struct CreatePayment {
    pub plan_id: Option<String>,
    pub amount_cents: Option<i64>,
    pub description: Option<String>,
    /// `pix` (or absent) for a direct payment, anything else for checkout.
    pub method: Option<String>,
    /// Defaults to the caller's identity.
    pub payer_email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreatedPayment {
    pub payment: Payment,
    /// True when an existing open payment was returned.
    pub reused: bool,
    pub redirect_url: Option<String>,
    pub pix_qr_code: Option<String>,
    pub pix_qr_code_base64: Option<String>,
}

impl CreatedPayment {
    fn reused(payment: Payment) -> Self {
        Self {
            payment,
            reused: true,
            redirect_url: None,
            pix_qr_code: None,
            pix_qr_code_base64: None,
        }
    }
}

fn is_direct(method: Option<&str>) -> bool {
    match method {
        None => true,
        Some(m) => m.trim().is_empty() || m.eq_ignore_ascii_case("pix"),
    }
}

pub struct Reconciler {
    pool: PgPool,
    gateway: Arc<dyn Gateway>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(pool: PgPool, gateway: Arc<dyn Gateway>, config: ReconcilerConfig) -> Self {
        Self {
            pool,
            gateway,
            config,
        }
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Create a payment, or return the open one created moments ago for the
    /// same plan.
    pub async fn create_payment(
        &self,
        caller: &Caller,
        request: CreatePayment,
    ) -> Result<CreatedPayment, ServiceError> {
        let amount_cents = request.amount_cents.unwrap_or(DEFAULT_AMOUNT_CENTS);
        if amount_cents <= 0 {
            return Err(ServiceError::Invalid("amount must be positive".to_string()));
        }
        let description = request
            .description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string());

        if let Some(plan_id) = &request.plan_id {
            let plan = plan_db::get_plan(&self.pool, plan_id)
                .await?
                .ok_or_else(|| ServiceError::not_found(format!("plan {plan_id}")))?;
            caller.ensure_access(&plan.owner, "plan")?;
        }

        let guard_plan = request.plan_id.clone().unwrap_or_default();
        let Some(acquired_at) = creation_guards::try_acquire(
            &self.pool,
            &guard_plan,
            &caller.identity,
            self.config.guard_interval,
        )
        .await?
        else {
            tracing::info!(plan_id = %guard_plan, owner = %caller.identity, "payment creation already in flight");
            return Err(ServiceError::RetryShortly(
                "a payment for this plan is already being created, retry shortly".to_string(),
            ));
        };
        self.schedule_guard_release(guard_plan, caller.identity.clone(), acquired_at);

        if let Some(plan_id) = &request.plan_id {
            if let Some(existing) =
                payments::find_recent_open_for_plan(&self.pool, plan_id, self.config.recency_window)
                    .await?
            {
                tracing::info!(
                    plan_id = %plan_id,
                    external_reference = %existing.external_reference,
                    "returning recent open payment"
                );
                return Ok(CreatedPayment::reused(existing));
            }
        }

        let external_reference = Uuid::new_v4().to_string();
        let payer_email = request
            .payer_email
            .as_deref()
            .unwrap_or(caller.identity.as_str());
        let order = PaymentOrder {
            amount_cents,
            description: &description,
            payer_email,
            external_reference: &external_reference,
        };

        let upstream = |e: GatewayError| {
            tracing::warn!(external_reference = %external_reference, error = %e, "gateway rejected payment creation");
            ServiceError::Upstream(e.to_string())
        };

        let mut new = NewPayment {
            external_reference: &external_reference,
            gateway_payment_id: None,
            gateway_preference_id: None,
            owner: &caller.identity,
            plan_id: request.plan_id.as_deref(),
            amount_cents,
            description: &description,
            status: payment_status::PENDING,
        };

        let created = if is_direct(request.method.as_deref()) {
            let direct = self.gateway.create_direct(&order).await.map_err(upstream)?;
            new.gateway_payment_id = Some(&direct.id);
            new.status = &direct.status;
            let payment = payments::insert_payment(&self.pool, &new).await?;
            CreatedPayment {
                payment,
                reused: false,
                redirect_url: None,
                pix_qr_code: direct.qr_code.clone(),
                pix_qr_code_base64: direct.qr_code_base64.clone(),
            }
        } else {
            let checkout = self.gateway.create_checkout(&order).await.map_err(upstream)?;
            new.gateway_preference_id = Some(&checkout.id);
            let payment = payments::insert_payment(&self.pool, &new).await?;
            CreatedPayment {
                payment,
                reused: false,
                redirect_url: Some(checkout.redirect_url.clone()),
                pix_qr_code: None,
                pix_qr_code_base64: None,
            }
        };

        tracing::info!(
            external_reference = %created.payment.external_reference,
            plan_id = ?created.payment.plan_id,
            status = %created.payment.status,
            "payment created"
        );
        Ok(created)
    }

    fn schedule_guard_release(
        &self,
        plan_id: String,
        owner: String,
        acquired_at: chrono::DateTime<chrono::Utc>,
    ) {
        let pool = self.pool.clone();
        let delay = self.config.guard_release_after;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = creation_guards::release(&pool, &plan_id, &owner, acquired_at).await {
                tracing::warn!(plan_id = %plan_id, owner = %owner, error = %e, "failed to release creation guard");
            }
        });
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// Bring a stored payment in line with the gateway.
    ///
    /// Returns the stored payment after reconciliation, or `None` when the
    /// identifier does not resolve to one. Gateway failures leave the
    /// payment unchanged.
    pub async fn reconcile(
        &self,
        source: ReconcileSource,
        identifier: &str,
    ) -> Result<Option<Payment>> {
        match source {
            ReconcileSource::Poll => {
                let Some(stored) =
                    payments::get_by_external_reference(&self.pool, identifier).await?
                else {
                    return Ok(None);
                };
                Ok(Some(self.refresh(stored, source).await))
            }
            ReconcileSource::Webhook => {
                let by_gateway_id =
                    payments::get_by_gateway_payment_id(&self.pool, identifier).await?;
                let fetched = match self.gateway.get_payment(identifier).await {
                    Ok(fetched) => fetched,
                    Err(e) => {
                        tracing::warn!(gateway_payment_id = identifier, error = %e, "gateway lookup failed, keeping stored status");
                        return Ok(by_gateway_id);
                    }
                };
                let stored = match by_gateway_id {
                    Some(stored) => Some(stored),
                    None => match fetched.external_reference.as_deref() {
                        Some(reference) => {
                            payments::get_by_external_reference(&self.pool, reference).await?
                        }
                        None => None,
                    },
                };
                let Some(stored) = stored else {
                    tracing::warn!(gateway_payment_id = identifier, "notification for unknown payment, ignoring");
                    return Ok(None);
                };
                Ok(Some(self.apply_or_keep(stored, &fetched, source).await))
            }
        }
    }

    /// Handle a webhook body. Notifications that are not about payments are
    /// ignored.
    pub async fn handle_webhook(&self, notification: &WebhookNotification) -> Result<Option<Payment>> {
        let Some(payment_id) = notification.payment_id() else {
            tracing::debug!(kind = ?notification.kind, action = ?notification.action, "ignoring notification");
            return Ok(None);
        };
        self.reconcile(ReconcileSource::Webhook, payment_id).await
    }

    /// Fetch gateway state for a stored payment and apply it. Never fails:
    /// any error yields the stored payment unchanged.
    async fn refresh(&self, stored: Payment, source: ReconcileSource) -> Payment {
        match self.fetch(&stored).await {
            Ok(Some(fetched)) => self.apply_or_keep(stored, &fetched, source).await,
            Ok(None) => stored,
            Err(e) => {
                tracing::warn!(
                    external_reference = %stored.external_reference,
                    error = %e,
                    "gateway lookup failed, keeping stored status"
                );
                stored
            }
        }
    }

    /// Direct payments are fetched by id; checkout payments that have not
    /// learned their gateway id are searched by reference.
    async fn fetch(&self, stored: &Payment) -> Result<Option<GatewayPayment>, GatewayError> {
        match &stored.gateway_payment_id {
            Some(id) => self.gateway.get_payment(id).await.map(Some),
            None => {
                let results = self
                    .gateway
                    .search_by_reference(&stored.external_reference)
                    .await?;
                Ok(most_recent(results))
            }
        }
    }

    async fn apply_or_keep(
        &self,
        stored: Payment,
        fetched: &GatewayPayment,
        source: ReconcileSource,
    ) -> Payment {
        match self.apply_status(stored.id, &fetched.status, Some(&fetched.id), source).await {
            Ok(payment) => payment,
            Err(e) => {
                tracing::warn!(
                    external_reference = %stored.external_reference,
                    error = %format!("{e:#}"),
                    "failed to apply gateway status"
                );
                stored
            }
        }
    }

    /// Lock the payment, compare, and write. A row already in a terminal
    /// status is never rewritten. The approval side effect runs only on the
    /// write that moves the row into `approved`.
    async fn apply_status(
        &self,
        payment_id: Uuid,
        new_status: &str,
        gateway_payment_id: Option<&str>,
        source: ReconcileSource,
    ) -> Result<Payment> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        let current = payments::lock_payment(&mut *tx, payment_id)
            .await?
            .with_context(|| format!("payment {payment_id} not found"))?;

        if current.status.eq_ignore_ascii_case(new_status) {
            tracing::debug!(
                external_reference = %current.external_reference,
                status = %current.status,
                source = %source,
                "payment status unchanged"
            );
            return Ok(current);
        }

        // Terminal statuses are final.
        if payment_status::is_terminal(&current.status) {
            tracing::warn!(
                external_reference = %current.external_reference,
                stored = %current.status,
                reported = new_status,
                source = %source,
                "ignoring status change for terminal payment"
            );
            return Ok(current);
        }

        let updated =
            payments::update_status(&mut *tx, payment_id, new_status, gateway_payment_id).await?;

        let approved_now =
            !payment_status::is_approved(&current.status) && payment_status::is_approved(new_status);
        if approved_now {
            entitlements::activate(
                &mut *tx,
                &updated.owner,
                &self.config.entitlement_tier,
                self.config.entitlement_months,
            )
            .await?;
            if let Some(plan_id) = &updated.plan_id {
                if !dispatch::approve_payment(&mut *tx, plan_id).await? {
                    tracing::warn!(plan_id = %plan_id, "approved payment for a plan not awaiting payment");
                }
            }
        }

        tx.commit().await.context("failed to commit payment update")?;

        tracing::info!(
            external_reference = %updated.external_reference,
            from = %current.status,
            to = %updated.status,
            source = %source,
            approved = approved_now,
            "payment status updated"
        );
        Ok(updated)
    }

    // -----------------------------------------------------------------------
    // Request-layer operations
    // -----------------------------------------------------------------------

    /// Poll path: current status of a payment, reconciled with the gateway
    /// unless it is already approved.
    pub async fn check_status(
        &self,
        external_reference: &str,
        caller: &Caller,
    ) -> Result<Payment, ServiceError> {
        let stored = payments::get_by_external_reference(&self.pool, external_reference)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("payment {external_reference}")))?;
        caller.ensure_access(&stored.owner, "payment")?;

        if payment_status::is_approved(&stored.status) {
            return Ok(stored);
        }
        Ok(self.refresh(stored, ReconcileSource::Poll).await)
    }

    /// The most recent payment for a plan, reconciled with the gateway.
    pub async fn recover_for_plan(
        &self,
        plan_id: &str,
        caller: &Caller,
    ) -> Result<Payment, ServiceError> {
        let stored = payments::list_for_plan(&self.pool, plan_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::not_found(format!("payment for plan {plan_id}")))?;
        caller.ensure_access(&stored.owner, "payment")?;

        if payment_status::is_approved(&stored.status) {
            return Ok(stored);
        }
        Ok(self.refresh(stored, ReconcileSource::Poll).await)
    }

    /// Approve a payment without contacting the gateway, through the same
    /// exactly-once write as real approvals.
    pub async fn simulate_approval(
        &self,
        external_reference: &str,
        caller: &Caller,
    ) -> Result<Payment, ServiceError> {
        if !caller.can_simulate_payments() {
            return Err(ServiceError::Forbidden(
                "payment simulation is not allowed for this user".to_string(),
            ));
        }
        let stored = payments::get_by_external_reference(&self.pool, external_reference)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("payment {external_reference}")))?;

        let payment = self
            .apply_status(stored.id, payment_status::APPROVED, None, ReconcileSource::Poll)
            .await?;
        tracing::info!(external_reference, caller = %caller.identity, "payment approval simulated");
        Ok(payment)
    }

    pub async fn list_payments_for_owner(&self, caller: &Caller) -> Result<Vec<Payment>, ServiceError> {
        Ok(payments::list_for_owner(&self.pool, &caller.identity).await?)
    }

    pub async fn list_payments_for_plan(
        &self,
        plan_id: &str,
        caller: &Caller,
    ) -> Result<Vec<Payment>, ServiceError> {
        let plan = plan_db::get_plan(&self.pool, plan_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("plan {plan_id}")))?;
        caller.ensure_access(&plan.owner, "plan")?;
        Ok(payments::list_for_plan(&self.pool, plan_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_selection() {
        assert!(is_direct(None));
        assert!(is_direct(Some("pix")));
        assert!(is_direct(Some("PIX")));
        assert!(is_direct(Some(" ")));
        assert!(!is_direct(Some("credit_card")));
    }

    #[test]
    fn default_config() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.guard_interval, Duration::from_secs(5));
        assert_eq!(config.guard_release_after, Duration::from_secs(30));
        assert_eq!(config.recency_window, Duration::from_secs(600));
        assert_eq!(config.entitlement_tier, "SINGLE_PLAN");
    }
}
