//! Plan lifecycle state machine.
//!
//! Validates and executes status transitions for plans, enforcing the
//! allowed transition graph with compare-and-set writes.

pub mod dispatch;

use anyhow::{Result, bail};
use sqlx::PgPool;

use periodize_db::models::PlanStatus;
use periodize_db::queries::plans as db;

/// The plan state machine.
///
/// Enforces the valid transition graph:
///
/// ```text
/// payment_pending  -> payment_approved  (payment confirmed)
/// payment_approved -> queued            (generation requested)
/// failed           -> queued            (re-submission)
/// queued           -> generating        (worker claim)
/// payment_approved -> generating        (worker claim)
/// failed           -> generating        (worker claim)
/// generating       -> completed         (content stored)
/// generating       -> failed            (generation failed)
/// queued           -> failed            (enqueue failed)
/// ```
pub struct PlanStateMachine;

impl PlanStateMachine {
    /// Check whether a transition from `from` to `to` is a valid edge
    /// in the state graph.
    pub fn is_valid_transition(from: PlanStatus, to: PlanStatus) -> bool {
        matches!(
            (from, to),
            (PlanStatus::PaymentPending, PlanStatus::PaymentApproved)
                | (PlanStatus::PaymentApproved, PlanStatus::Queued)
                | (PlanStatus::Failed, PlanStatus::Queued)
                | (PlanStatus::Queued, PlanStatus::Generating)
                | (PlanStatus::PaymentApproved, PlanStatus::Generating)
                | (PlanStatus::Failed, PlanStatus::Generating)
                | (PlanStatus::Generating, PlanStatus::Completed)
                | (PlanStatus::Generating, PlanStatus::Failed)
                | (PlanStatus::Queued, PlanStatus::Failed)
        )
    }

    /// Execute a content-free transition with optimistic locking.
    ///
    /// Returns an error if:
    /// - The transition is not valid.
    /// - The target is `completed` (use [`dispatch::complete_generation`],
    ///   which stores the content in the same write).
    /// - The current status in the database does not match `from`.
    /// - The plan does not exist.
    pub async fn transition(
        pool: &PgPool,
        plan_id: &str,
        from: PlanStatus,
        to: PlanStatus,
    ) -> Result<()> {
        if !Self::is_valid_transition(from, to) {
            bail!("invalid state transition: {from} -> {to} for plan {plan_id}");
        }
        if to == PlanStatus::Completed {
            bail!("plan {plan_id} can only be completed together with its content");
        }

        let rows = db::transition_plan_status(pool, plan_id, from, to).await?;
        if rows == 0 {
            return Err(Self::lock_failure(pool, plan_id, from).await);
        }

        tracing::info!(plan_id, from = %from, to = %to, "plan transitioned");
        Ok(())
    }

    /// Explain why a compare-and-set matched no row.
    async fn lock_failure(pool: &PgPool, plan_id: &str, expected: PlanStatus) -> anyhow::Error {
        match db::get_plan(pool, plan_id).await {
            Ok(None) => anyhow::anyhow!("plan {plan_id} not found"),
            Ok(Some(p)) => anyhow::anyhow!(
                "optimistic lock failed: plan {plan_id} has status {}, expected {expected}",
                p.status
            ),
            Err(e) => e,
        }
    }
}
