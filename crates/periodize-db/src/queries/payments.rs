//! Database query functions for the `payments` table.

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::models::{Payment, payment_status};

/// Fields required to insert a new payment.
#[derive(Debug, Clone)]
pub struct NewPayment<'a> {
    pub external_reference: &'a str,
    pub gateway_payment_id: Option<&'a str>,
    pub gateway_preference_id: Option<&'a str>,
    pub owner: &'a str,
    pub plan_id: Option<&'a str>,
    pub amount_cents: i64,
    pub description: &'a str,
    pub status: &'a str,
}

/// Insert a new payment row.
pub async fn insert_payment(pool: &PgPool, new: &NewPayment<'_>) -> Result<Payment> {
    let payment = sqlx::query_as::<_, Payment>(
        "INSERT INTO payments \
             (external_reference, gateway_payment_id, gateway_preference_id, \
              owner, plan_id, amount_cents, description, status) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING *",
    )
    .bind(new.external_reference)
    .bind(new.gateway_payment_id)
    .bind(new.gateway_preference_id)
    .bind(new.owner)
    .bind(new.plan_id)
    .bind(new.amount_cents)
    .bind(new.description)
    .bind(new.status)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert payment {}", new.external_reference))?;

    Ok(payment)
}

/// Fetch a payment by its client-generated external reference.
pub async fn get_by_external_reference(
    pool: &PgPool,
    external_reference: &str,
) -> Result<Option<Payment>> {
    let payment =
        sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE external_reference = $1")
            .bind(external_reference)
            .fetch_optional(pool)
            .await
            .context("failed to fetch payment by external reference")?;

    Ok(payment)
}

/// Fetch a payment by the gateway-assigned payment id.
pub async fn get_by_gateway_payment_id(
    pool: &PgPool,
    gateway_payment_id: &str,
) -> Result<Option<Payment>> {
    let payment =
        sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE gateway_payment_id = $1")
            .bind(gateway_payment_id)
            .fetch_optional(pool)
            .await
            .context("failed to fetch payment by gateway id")?;

    Ok(payment)
}

/// List the payments linked to a plan, newest first.
pub async fn list_for_plan(pool: &PgPool, plan_id: &str) -> Result<Vec<Payment>> {
    let payments = sqlx::query_as::<_, Payment>(
        "SELECT * FROM payments WHERE plan_id = $1 ORDER BY created_at DESC",
    )
    .bind(plan_id)
    .fetch_all(pool)
    .await
    .context("failed to list payments for plan")?;

    Ok(payments)
}

/// List the payments made by one owner, newest first.
pub async fn list_for_owner(pool: &PgPool, owner: &str) -> Result<Vec<Payment>> {
    let payments = sqlx::query_as::<_, Payment>(
        "SELECT * FROM payments WHERE owner = $1 ORDER BY created_at DESC",
    )
    .bind(owner)
    .fetch_all(pool)
    .await
    .context("failed to list payments for owner")?;

    Ok(payments)
}

/// Most recent payment for a plan that is still open (pending, in process
/// or in mediation) and was created less than `window` ago.
pub async fn find_recent_open_for_plan(
    pool: &PgPool,
    plan_id: &str,
    window: std::time::Duration,
) -> Result<Option<Payment>> {
    let open: Vec<String> = payment_status::OPEN.iter().map(|s| s.to_string()).collect();
    let payment = sqlx::query_as::<_, Payment>(
        "SELECT * FROM payments \
         WHERE plan_id = $1 \
           AND lower(status) = ANY($2) \
           AND created_at > now() - make_interval(secs => $3) \
         ORDER BY created_at DESC \
         LIMIT 1",
    )
    .bind(plan_id)
    .bind(&open)
    .bind(window.as_secs_f64())
    .fetch_optional(pool)
    .await
    .context("failed to look up recent open payment")?;

    Ok(payment)
}

/// Lock a payment row for the rest of the surrounding transaction.
pub async fn lock_payment(conn: &mut PgConnection, id: Uuid) -> Result<Option<Payment>> {
    let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(conn)
        .await
        .context("failed to lock payment")?;

    Ok(payment)
}

/// Store a new gateway status, stamping `updated_at`. A gateway payment id
/// is recorded when the row did not have one yet (checkout payments learn
/// theirs from the first notification).
pub async fn update_status(
    conn: &mut PgConnection,
    id: Uuid,
    status: &str,
    gateway_payment_id: Option<&str>,
) -> Result<Payment> {
    let payment = sqlx::query_as::<_, Payment>(
        "UPDATE payments \
         SET status = $1, \
             updated_at = now(), \
             gateway_payment_id = COALESCE(gateway_payment_id, $2) \
         WHERE id = $3 \
         RETURNING *",
    )
    .bind(status)
    .bind(gateway_payment_id)
    .bind(id)
    .fetch_one(conn)
    .await
    .with_context(|| format!("failed to update status of payment {id}"))?;

    Ok(payment)
}
