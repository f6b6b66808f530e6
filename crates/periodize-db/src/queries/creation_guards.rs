//! Database query functions for the `payment_creation_guards` table.
//!
//! A guard row marks a payment creation for `(plan_id, owner)` as in
//! flight. Acquisition is a single conditional upsert, so it holds across
//! any number of server instances sharing the database.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Try to take the guard for `(plan_id, owner)`.
///
/// Succeeds when no guard exists or the existing one is older than
/// `guard_interval` (it is then overwritten). Returns the acquisition
/// timestamp on success, which identifies this holder for [`release`].
pub async fn try_acquire(
    pool: &PgPool,
    plan_id: &str,
    owner: &str,
    guard_interval: Duration,
) -> Result<Option<DateTime<Utc>>> {
    let acquired: Option<DateTime<Utc>> = sqlx::query_scalar(
        "INSERT INTO payment_creation_guards (plan_id, owner, acquired_at) \
         VALUES ($1, $2, clock_timestamp()) \
         ON CONFLICT (plan_id, owner) DO UPDATE \
         SET acquired_at = EXCLUDED.acquired_at \
         WHERE payment_creation_guards.acquired_at \
               < clock_timestamp() - make_interval(secs => $3) \
         RETURNING acquired_at",
    )
    .bind(plan_id)
    .bind(owner)
    .bind(guard_interval.as_secs_f64())
    .fetch_optional(pool)
    .await
    .context("failed to acquire payment creation guard")?;

    Ok(acquired)
}

/// Release a guard, but only if it is still the one taken at `acquired_at`.
pub async fn release(
    pool: &PgPool,
    plan_id: &str,
    owner: &str,
    acquired_at: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM payment_creation_guards \
         WHERE plan_id = $1 AND owner = $2 AND acquired_at = $3",
    )
    .bind(plan_id)
    .bind(owner)
    .bind(acquired_at)
    .execute(pool)
    .await
    .context("failed to release payment creation guard")?;

    Ok(result.rows_affected())
}
