//! Operator-mode CLI handlers for `periodize plan` subcommands and
//! `periodize status`.
//!
//! Implements:
//! - `periodize plan show <plan-id>`        -- show one plan in full
//! - `periodize plan list [--owner]`        -- list plans
//! - `periodize plan requeue <plan-id>`     -- request generation as an operator
//! - `periodize plan reset-stale`           -- fail plans stuck in generating
//! - `periodize status`                     -- plan counts and queue depth

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;

use periodize_core::discipline;
use periodize_core::plan::PlanService;
use periodize_core::Caller;
use periodize_db::models::{Discipline, Plan, PlanStatus};
use periodize_db::queries::{generation_queue, payments, plans as plan_queries};

use crate::PlanCommands;

/// Identity recorded when an operator acts on a plan from the CLI.
const OPERATOR: &str = "operator";

// -----------------------------------------------------------------------
// Public entry points
// -----------------------------------------------------------------------

/// Dispatch a `PlanCommands` variant to the appropriate handler.
pub async fn run_plan_command(
    command: PlanCommands,
    pool: &PgPool,
    plans: &PlanService,
) -> Result<()> {
    match command {
        PlanCommands::Show { plan_id } => cmd_show(pool, &plan_id).await,
        PlanCommands::List { owner } => cmd_list(pool, owner.as_deref()).await,
        PlanCommands::Requeue { plan_id } => cmd_requeue(plans, &plan_id).await.map(|_| ()),
        PlanCommands::ResetStale { older_than_mins } => {
            cmd_reset_stale(pool, Duration::from_secs(older_than_mins * 60))
                .await
                .map(|_| ())
        }
    }
}

/// `periodize status`: plan counts by status and pending generation
/// messages per discipline.
pub async fn run_status(pool: &PgPool) -> Result<()> {
    let counts = plan_queries::count_by_status(pool).await?;
    let total: i64 = counts.iter().map(|(_, n)| n).sum();

    println!("Plans: {total}");
    for status in PlanStatus::ALL {
        let n = counts
            .iter()
            .find(|(s, _)| *s == status)
            .map(|(_, n)| *n)
            .unwrap_or(0);
        println!("  {:<16} {n}", status.to_string());
    }

    println!();
    println!("Pending generation messages:");
    for d in Discipline::ALL {
        let route = discipline::route(d);
        let pending = generation_queue::pending_count(pool, &route.queue_name).await?;
        println!("  {:<16} {pending}", d.to_string());
    }

    Ok(())
}

// -----------------------------------------------------------------------
// periodize plan show <plan-id>
// -----------------------------------------------------------------------

async fn cmd_show(pool: &PgPool, plan_id: &str) -> Result<()> {
    let plan = plan_queries::get_plan(pool, plan_id)
        .await?
        .with_context(|| format!("plan not found: {plan_id}"))?;
    let plan_payments = payments::list_for_plan(pool, plan_id).await?;

    println!("Plan: {}", plan.plan_id);
    println!("  Owner:        {}", plan.owner);
    println!("  Discipline:   {}", plan.discipline);
    println!("  Status:       {}", plan.status);
    println!("  Duration:     {} weeks", plan.plan_duration);
    println!("  Dates:        {} .. {}", plan.start_date, plan.end_date);
    println!(
        "  Created:      {}",
        plan.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "  Updated:      {}",
        plan.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    for path in &plan.document_paths {
        println!("  Document:     {path}");
    }

    if !plan_payments.is_empty() {
        println!();
        println!("Payments:");
        for p in &plan_payments {
            println!(
                "  [{}] {}  {} cents  {}",
                p.status,
                p.external_reference,
                p.amount_cents,
                p.created_at.format("%Y-%m-%d %H:%M"),
            );
        }
    }

    if !plan.content.is_empty() {
        println!();
        println!("{}", plan.content);
    }

    Ok(())
}

// -----------------------------------------------------------------------
// periodize plan list
// -----------------------------------------------------------------------

async fn cmd_list(pool: &PgPool, owner: Option<&str>) -> Result<()> {
    let plans = match owner {
        Some(owner) => plan_queries::list_plans_for_owner(pool, owner).await?,
        None => plan_queries::list_plans(pool).await?,
    };

    if plans.is_empty() {
        println!("No plans found.");
        return Ok(());
    }

    let id_w = plans.iter().map(|p| p.plan_id.len()).max().unwrap_or(2).max(2);
    let owner_w = plans.iter().map(|p| p.owner.len()).max().unwrap_or(5).max(5);
    let status_w = 16;
    let disc_w = 10;

    println!(
        "{:<id_w$}  {:<owner_w$}  {:<disc_w$}  {:<status_w$}  CREATED",
        "ID", "OWNER", "DISCIPLINE", "STATUS",
    );
    for plan in &plans {
        println!(
            "{:<id_w$}  {:<owner_w$}  {:<disc_w$}  {:<status_w$}  {}",
            plan.plan_id,
            plan.owner,
            plan.discipline.to_string(),
            plan.status.to_string(),
            plan.created_at.format("%Y-%m-%d %H:%M"),
        );
    }

    Ok(())
}

// -----------------------------------------------------------------------
// periodize plan requeue <plan-id>
// -----------------------------------------------------------------------

async fn cmd_requeue(plans: &PlanService, plan_id: &str) -> Result<Plan> {
    let plan = plans
        .request_generation(plan_id, &Caller::admin(OPERATOR))
        .await
        .with_context(|| format!("failed to requeue plan {plan_id}"))?;
    println!("Plan {} queued for {} generation.", plan.plan_id, plan.discipline);
    Ok(plan)
}

// -----------------------------------------------------------------------
// periodize plan reset-stale
// -----------------------------------------------------------------------

async fn cmd_reset_stale(pool: &PgPool, older_than: Duration) -> Result<Vec<Plan>> {
    let reset = plan_queries::fail_stale_generating(pool, older_than).await?;
    if reset.is_empty() {
        println!("No stale generating plans.");
    } else {
        println!("Marked {} stale plan(s) failed:", reset.len());
        for plan in &reset {
            println!("  {}", plan.plan_id);
        }
        println!("Use `periodize plan requeue <plan-id>` to generate them again.");
    }
    Ok(reset)
}
