//! Plan service: creation of pending plans and generation requests, with
//! the ownership rules of the request layer.

use anyhow::Context;
use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use periodize_db::models::{Discipline, Plan, PlanStatus};
use periodize_db::queries::plans::{self as db, NewPlan};

use crate::caller::Caller;
use crate::discipline::AthleteData;
use crate::dispatcher::Dispatcher;
use crate::error::ServiceError;
use crate::state::dispatch;

pub const MIN_DURATION_WEEKS: i32 = 1;
pub const MAX_DURATION_WEEKS: i32 = 52;

/// Input for [`PlanService::create_pending_plan`].
#[derive(Debug, Clone)]
pub struct NewPlanRequest {
    /// Generated when absent.
    pub plan_id: Option<String>,
    pub discipline: Discipline,
    pub athlete: serde_json::Value,
    pub duration_weeks: i32,
    pub start_date: Option<NaiveDate>,
}

/// Read-only projection of a plan for the request layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanView {
    pub plan_id: String,
    pub discipline: Discipline,
    pub status: PlanStatus,
    pub can_generate: bool,
    pub plan_duration: i32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub content: String,
    pub document_paths: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Plan> for PlanView {
    fn from(plan: Plan) -> Self {
        Self {
            can_generate: plan.status.can_generate(),
            plan_id: plan.plan_id,
            discipline: plan.discipline,
            status: plan.status,
            plan_duration: plan.plan_duration,
            start_date: plan.start_date,
            end_date: plan.end_date,
            content: plan.content,
            document_paths: plan.document_paths,
            created_at: plan.created_at,
        }
    }
}

/// First day of a plan: `today` if it is a Monday, else the next Monday.
pub fn next_monday(today: NaiveDate) -> NaiveDate {
    let days_ahead = (7 - today.weekday().num_days_from_monday()) % 7;
    today + Days::new(u64::from(days_ahead))
}

/// Start and end dates of a plan lasting `weeks` weeks.
pub fn plan_dates(start: Option<NaiveDate>, today: NaiveDate, weeks: i32) -> (NaiveDate, NaiveDate) {
    let start = start.unwrap_or_else(|| next_monday(today));
    let end = start + Days::new(7 * weeks.max(0) as u64);
    (start, end)
}

#[derive(Clone)]
pub struct PlanService {
    pool: PgPool,
    dispatcher: Dispatcher,
}

impl PlanService {
    pub fn new(pool: PgPool, dispatcher: Dispatcher) -> Self {
        Self { pool, dispatcher }
    }

    /// Validate the athlete data and store a plan awaiting payment.
    pub async fn create_pending_plan(
        &self,
        caller: &Caller,
        request: NewPlanRequest,
    ) -> Result<Plan, ServiceError> {
        if !(MIN_DURATION_WEEKS..=MAX_DURATION_WEEKS).contains(&request.duration_weeks) {
            return Err(ServiceError::Invalid(format!(
                "duration must be between {MIN_DURATION_WEEKS} and {MAX_DURATION_WEEKS} weeks, got {}",
                request.duration_weeks
            )));
        }

        let athlete = AthleteData::from_value(request.discipline, &request.athlete)
            .map_err(|e| ServiceError::Invalid(e.to_string()))?;
        athlete
            .validate()
            .map_err(|e| ServiceError::Invalid(e.to_string()))?;

        let plan_id = match request.plan_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => Uuid::new_v4().to_string(),
        };
        if db::get_plan(&self.pool, &plan_id).await?.is_some() {
            return Err(ServiceError::IllegalState(format!(
                "plan {plan_id} already exists"
            )));
        }

        let (start_date, end_date) = plan_dates(
            request.start_date,
            Utc::now().date_naive(),
            request.duration_weeks,
        );
        let document = athlete.to_value();
        let plan = db::insert_plan(
            &self.pool,
            &NewPlan {
                plan_id: &plan_id,
                owner: &caller.identity,
                discipline: request.discipline,
                athlete: &document,
                plan_duration: request.duration_weeks,
                start_date,
                end_date,
            },
        )
        .await?;

        tracing::info!(
            plan_id = %plan.plan_id,
            owner = %plan.owner,
            discipline = %plan.discipline,
            weeks = plan.plan_duration,
            %start_date,
            "plan created"
        );
        Ok(plan)
    }

    /// Queue an approved or previously failed plan for generation.
    ///
    /// The plan is moved to `queued` before the message is published; if
    /// publishing fails it is moved on to `failed` and can be requested
    /// again.
    pub async fn request_generation(
        &self,
        plan_id: &str,
        caller: &Caller,
    ) -> Result<Plan, ServiceError> {
        let plan = self.get_plan_for(plan_id, caller).await?;
        if !plan.status.can_generate() {
            return Err(ServiceError::IllegalState(format!(
                "plan {plan_id} cannot be generated while {}",
                plan.status
            )));
        }

        dispatch::queue_plan(&self.pool, plan_id, plan.status)
            .await
            .map_err(|e| {
                if format!("{e:#}").contains("optimistic lock failed") {
                    ServiceError::IllegalState(format!(
                        "plan {plan_id} changed status concurrently, retry"
                    ))
                } else {
                    ServiceError::Internal(e)
                }
            })?;

        if let Err(e) = self
            .dispatcher
            .enqueue(plan_id, &plan.owner, plan.discipline)
            .await
        {
            tracing::error!(plan_id, error = %format!("{e:#}"), "enqueue failed, marking plan failed");
            if let Err(revert) = dispatch::fail_enqueue(&self.pool, plan_id).await {
                tracing::warn!(plan_id, error = %format!("{revert:#}"), "could not mark plan failed");
            }
            return Err(ServiceError::Upstream(format!(
                "could not queue plan {plan_id} for generation"
            )));
        }

        let queued = db::get_plan(&self.pool, plan_id)
            .await?
            .with_context(|| format!("plan {plan_id} disappeared after queueing"))?;
        Ok(queued)
    }

    pub async fn get_plan_for(&self, plan_id: &str, caller: &Caller) -> Result<Plan, ServiceError> {
        let plan = db::get_plan(&self.pool, plan_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("plan {plan_id}")))?;
        caller.ensure_access(&plan.owner, "plan")?;
        Ok(plan)
    }

    /// The caller's plans, or every plan for admins.
    pub async fn list_plans_for(&self, caller: &Caller) -> Result<Vec<Plan>, ServiceError> {
        let plans = if caller.is_admin() {
            db::list_plans(&self.pool).await?
        } else {
            db::list_plans_for_owner(&self.pool, &caller.identity).await?
        };
        Ok(plans)
    }
}
