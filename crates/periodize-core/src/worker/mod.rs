//! Generation worker: consumes generation messages for one discipline and
//! drives a plan from claim to `completed` or `failed`.
//!
//! Steps for each delivery:
//! 1. Load the plan; drop the message if it is missing.
//! 2. Drop it if it names another discipline.
//! 3. Drop it if the plan is not in a claimable status.
//! 4. Claim the plan (`-> generating`) in one check-and-set statement.
//! 5. Project the stored athlete data.
//! 6. Generate content, render the document and store it.
//! 7. Store content and paths and mark the plan `completed`.
//! 8. On any failure in 5-7, mark the plan `failed`. Nothing propagates.

pub mod pool;

pub use pool::{PoolConfig, run_worker_pool};

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;

use periodize_db::models::{Discipline, Plan, PlanStatus};
use periodize_db::queries::plans as plan_db;

use crate::discipline;
use crate::dispatcher::GenerationMessage;
use crate::renderer::{GenerationError, Renderer};
use crate::state::dispatch;
use crate::storage::FileStore;

/// Default bound on one generation attempt.
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(300);

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed,
    /// The attempt failed and the plan was marked `failed`.
    Failed { kind: &'static str },
    Dropped(DropReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    PlanNotFound,
    WrongDiscipline(Discipline),
    NotClaimable(PlanStatus),
    /// Another worker claimed the plan between the check and the claim.
    LostClaim,
}

/// One discipline's instance of the generation pipeline.
pub struct Worker {
    pool: PgPool,
    discipline: Discipline,
    renderer: Arc<dyn Renderer>,
    store: Arc<dyn FileStore>,
    generation_timeout: Duration,
}

impl Worker {
    pub fn new(
        pool: PgPool,
        discipline: Discipline,
        renderer: Arc<dyn Renderer>,
        store: Arc<dyn FileStore>,
    ) -> Self {
        Self {
            pool,
            discipline,
            renderer,
            store,
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn discipline(&self) -> Discipline {
        self.discipline
    }

    /// Process one delivery.
    ///
    /// Errors are returned only when the plan store cannot be read before
    /// a claim is made; generation failures are recorded on the plan.
    pub async fn process(&self, message: &GenerationMessage) -> Result<ProcessOutcome> {
        let plan_id = message.plan_id.as_str();

        let Some(plan) = plan_db::get_plan(&self.pool, plan_id).await? else {
            tracing::warn!(plan_id, "plan not found, dropping message");
            return Ok(ProcessOutcome::Dropped(DropReason::PlanNotFound));
        };

        if message.discipline != self.discipline || plan.discipline != self.discipline {
            tracing::debug!(
                plan_id,
                message_discipline = %message.discipline,
                worker_discipline = %self.discipline,
                "message for another discipline, dropping"
            );
            return Ok(ProcessOutcome::Dropped(DropReason::WrongDiscipline(
                message.discipline,
            )));
        }

        if !plan.status.is_claimable() {
            tracing::info!(plan_id, status = %plan.status, "plan not claimable, dropping message");
            return Ok(ProcessOutcome::Dropped(DropReason::NotClaimable(plan.status)));
        }

        let Some(plan) = dispatch::claim_for_generation(&self.pool, plan_id, self.discipline).await?
        else {
            tracing::info!(plan_id, "plan claimed elsewhere, dropping message");
            return Ok(ProcessOutcome::Dropped(DropReason::LostClaim));
        };

        let result = match tokio::time::timeout(self.generation_timeout, self.generate(&plan)).await
        {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout(self.generation_timeout)),
        };

        let result = match result {
            Ok((content, paths)) => {
                dispatch::complete_generation(&self.pool, plan_id, &content, &paths)
                    .await
                    .map_err(|e| GenerationError::StoreWrite(format!("{e:#}")))
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => Ok(ProcessOutcome::Completed),
            Err(e) => {
                tracing::error!(
                    plan_id,
                    discipline = %self.discipline,
                    kind = e.kind(),
                    error = %e,
                    "plan generation failed"
                );
                if let Err(store_err) = dispatch::fail_generation(&self.pool, plan_id).await {
                    tracing::error!(plan_id, error = %store_err, "failed to mark plan failed");
                }
                Ok(ProcessOutcome::Failed { kind: e.kind() })
            }
        }
    }

    /// Steps 5-6: athlete data, content, document.
    async fn generate(&self, plan: &Plan) -> Result<(String, Vec<String>), GenerationError> {
        let athlete = discipline::athlete_data(plan)?;

        let content = self
            .renderer
            .generate_content(&athlete, plan.plan_duration)
            .await?;
        if content.trim().is_empty() {
            return Err(GenerationError::Parse("renderer returned empty content".to_string()));
        }

        let bytes = self
            .renderer
            .render_document(plan, &athlete, &content)
            .await?;
        let path = self
            .store
            .save(plan.discipline, &plan.plan_id, &bytes)
            .await
            .map_err(|e| GenerationError::StoreWrite(format!("{e:#}")))?;

        Ok((content, vec![path]))
    }
}
