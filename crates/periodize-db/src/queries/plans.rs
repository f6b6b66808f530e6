//! Database query functions for the `plans` table.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::{PgConnection, PgPool};

use crate::models::{Discipline, Plan, PlanStatus};

/// Fields required to insert a new plan.
#[derive(Debug, Clone)]
pub struct NewPlan<'a> {
    pub plan_id: &'a str,
    pub owner: &'a str,
    pub discipline: Discipline,
    pub athlete: &'a serde_json::Value,
    pub plan_duration: i32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Insert a new plan in `payment_pending` with empty content.
pub async fn insert_plan(pool: &PgPool, new: &NewPlan<'_>) -> Result<Plan> {
    let plan = sqlx::query_as::<_, Plan>(
        "INSERT INTO plans \
             (plan_id, owner, discipline, athlete, plan_duration, start_date, end_date) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(new.plan_id)
    .bind(new.owner)
    .bind(new.discipline)
    .bind(new.athlete)
    .bind(new.plan_duration)
    .bind(new.start_date)
    .bind(new.end_date)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert plan {}", new.plan_id))?;

    Ok(plan)
}

/// Fetch a plan by its ID.
pub async fn get_plan(pool: &PgPool, plan_id: &str) -> Result<Option<Plan>> {
    let plan = sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE plan_id = $1")
        .bind(plan_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch plan")?;

    Ok(plan)
}

/// List all plans, newest first.
pub async fn list_plans(pool: &PgPool) -> Result<Vec<Plan>> {
    let plans = sqlx::query_as::<_, Plan>("SELECT * FROM plans ORDER BY created_at DESC")
        .fetch_all(pool)
        .await
        .context("failed to list plans")?;

    Ok(plans)
}

/// List the plans belonging to one owner, newest first.
pub async fn list_plans_for_owner(pool: &PgPool, owner: &str) -> Result<Vec<Plan>> {
    let plans = sqlx::query_as::<_, Plan>(
        "SELECT * FROM plans WHERE owner = $1 ORDER BY created_at DESC",
    )
    .bind(owner)
    .fetch_all(pool)
    .await
    .context("failed to list plans for owner")?;

    Ok(plans)
}

/// Compare-and-set a plan's status. Returns the number of rows affected
/// (0 means the plan is missing or its status did not match `from`).
pub async fn transition_plan_status(
    pool: &PgPool,
    plan_id: &str,
    from: PlanStatus,
    to: PlanStatus,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE plans \
         SET status = $1, updated_at = now() \
         WHERE plan_id = $2 AND status = $3",
    )
    .bind(to)
    .bind(plan_id)
    .bind(from)
    .execute(pool)
    .await
    .context("failed to transition plan status")?;

    Ok(result.rows_affected())
}

/// Move a `payment_pending` plan to `payment_approved` on an existing
/// connection, so the caller can make it part of a larger transaction.
pub async fn approve_pending_plan(conn: &mut PgConnection, plan_id: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE plans \
         SET status = 'payment_approved', updated_at = now() \
         WHERE plan_id = $1 AND status = 'payment_pending'",
    )
    .bind(plan_id)
    .execute(conn)
    .await
    .context("failed to approve pending plan")?;

    Ok(result.rows_affected())
}

/// Claim a plan for generation: a single-statement check-and-set from any
/// claimable status (`queued`, `payment_approved`, `failed`) to
/// `generating`.
///
/// Returns the claimed plan, or `None` when the plan is missing, belongs to
/// another discipline, or is not in a claimable status. Two workers racing
/// on the same plan cannot both get `Some`.
pub async fn claim_for_generation(
    pool: &PgPool,
    plan_id: &str,
    discipline: Discipline,
) -> Result<Option<Plan>> {
    let plan = sqlx::query_as::<_, Plan>(
        "UPDATE plans \
         SET status = 'generating', updated_at = now() \
         WHERE plan_id = $1 \
           AND discipline = $2 \
           AND status IN ('queued', 'payment_approved', 'failed') \
         RETURNING *",
    )
    .bind(plan_id)
    .bind(discipline)
    .fetch_optional(pool)
    .await
    .context("failed to claim plan for generation")?;

    Ok(plan)
}

/// Store generated content and document paths and mark the plan
/// `completed`, only if it is currently `generating`.
pub async fn complete_plan(
    pool: &PgPool,
    plan_id: &str,
    content: &str,
    document_paths: &[String],
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE plans \
         SET status = 'completed', content = $1, document_paths = $2, updated_at = now() \
         WHERE plan_id = $3 AND status = 'generating'",
    )
    .bind(content)
    .bind(document_paths)
    .bind(plan_id)
    .execute(pool)
    .await
    .context("failed to complete plan")?;

    Ok(result.rows_affected())
}

/// Mark a plan `failed` if it is `generating`. Content is left untouched
/// (it is always empty in that state).
pub async fn fail_plan(pool: &PgPool, plan_id: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE plans \
         SET status = 'failed', updated_at = now() \
         WHERE plan_id = $1 AND status = 'generating'",
    )
    .bind(plan_id)
    .execute(pool)
    .await
    .context("failed to mark plan failed")?;

    Ok(result.rows_affected())
}

/// Fail every plan that has sat in `generating` longer than `older_than`.
///
/// Used for crash recovery: a worker that died mid-generation leaves its
/// plan stuck, and only `failed` can be re-queued.
pub async fn fail_stale_generating(
    pool: &PgPool,
    older_than: std::time::Duration,
) -> Result<Vec<Plan>> {
    let plans = sqlx::query_as::<_, Plan>(
        "UPDATE plans \
         SET status = 'failed', updated_at = now() \
         WHERE status = 'generating' \
           AND updated_at < now() - make_interval(secs => $1) \
         RETURNING *",
    )
    .bind(older_than.as_secs_f64())
    .fetch_all(pool)
    .await
    .context("failed to reset stale generating plans")?;

    Ok(plans)
}

/// Count plans grouped by status.
pub async fn count_by_status(pool: &PgPool) -> Result<Vec<(PlanStatus, i64)>> {
    let rows: Vec<(PlanStatus, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) FROM plans GROUP BY status ORDER BY status",
    )
    .fetch_all(pool)
    .await
    .context("failed to count plans by status")?;

    Ok(rows)
}
