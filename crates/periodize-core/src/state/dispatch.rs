//! Convenience helpers that wrap [`super::PlanStateMachine`] transitions
//! with semantic names.

use anyhow::{Result, bail};
use sqlx::{PgConnection, PgPool};

use periodize_db::models::{Discipline, Plan, PlanStatus};
use periodize_db::queries::plans as db;

use super::PlanStateMachine;

/// Queue a plan for generation: `payment_approved | failed -> queued`.
pub async fn queue_plan(pool: &PgPool, plan_id: &str, from: PlanStatus) -> Result<()> {
    PlanStateMachine::transition(pool, plan_id, from, PlanStatus::Queued).await
}

/// Revert a plan whose message could not be published: `queued -> failed`.
pub async fn fail_enqueue(pool: &PgPool, plan_id: &str) -> Result<()> {
    PlanStateMachine::transition(pool, plan_id, PlanStatus::Queued, PlanStatus::Failed).await
}

/// Approve a plan whose payment was confirmed: `payment_pending ->
/// payment_approved`, on the caller's transaction.
///
/// Returns `false` when the plan was not awaiting payment.
pub async fn approve_payment(conn: &mut PgConnection, plan_id: &str) -> Result<bool> {
    let rows = db::approve_pending_plan(conn, plan_id).await?;
    if rows > 0 {
        tracing::info!(plan_id, "plan payment approved");
    }
    Ok(rows > 0)
}

/// Claim a plan for generation: any claimable status `-> generating`.
///
/// `None` means the plan is missing, belongs to another discipline or is
/// not claimable. At most one concurrent caller gets `Some`.
pub async fn claim_for_generation(
    pool: &PgPool,
    plan_id: &str,
    discipline: Discipline,
) -> Result<Option<Plan>> {
    let claimed = db::claim_for_generation(pool, plan_id, discipline).await?;
    if claimed.is_some() {
        tracing::info!(plan_id, discipline = %discipline, "plan claimed for generation");
    }
    Ok(claimed)
}

/// Store generated content and mark the plan `completed`:
/// `generating -> completed`.
pub async fn complete_generation(
    pool: &PgPool,
    plan_id: &str,
    content: &str,
    document_paths: &[String],
) -> Result<()> {
    if content.is_empty() {
        bail!("plan {plan_id} cannot be completed with empty content");
    }
    let rows = db::complete_plan(pool, plan_id, content, document_paths).await?;
    if rows == 0 {
        bail!("optimistic lock failed: plan {plan_id} is no longer generating");
    }
    tracing::info!(plan_id, documents = document_paths.len(), "plan completed");
    Ok(())
}

/// Mark a generation attempt failed: `generating -> failed`.
///
/// Returns `false` when the plan is no longer generating, e.g. after a
/// stale reset and re-queue handed it to another attempt.
pub async fn fail_generation(pool: &PgPool, plan_id: &str) -> Result<bool> {
    let rows = db::fail_plan(pool, plan_id).await?;
    if rows > 0 {
        tracing::info!(plan_id, "plan marked failed");
    }
    Ok(rows > 0)
}
