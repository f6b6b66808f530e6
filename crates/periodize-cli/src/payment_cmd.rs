//! Operator-mode CLI handlers for `periodize payment` subcommands.

use anyhow::{Context, Result};

use periodize_core::payment::{Reconciler, ReconcileSource};
use periodize_core::Caller;
use periodize_db::models::Payment;

use crate::PaymentCommands;

pub async fn run_payment_command(command: PaymentCommands, reconciler: &Reconciler) -> Result<()> {
    match command {
        PaymentCommands::Reconcile { external_reference } => {
            cmd_reconcile(reconciler, &external_reference).await
        }
        PaymentCommands::List { plan_id } => cmd_list(reconciler, &plan_id).await,
    }
}

/// Run the poll path for one payment and report where it ended up.
async fn cmd_reconcile(reconciler: &Reconciler, external_reference: &str) -> Result<()> {
    let payment = reconciler
        .reconcile(ReconcileSource::Poll, external_reference)
        .await?
        .with_context(|| format!("payment not found: {external_reference}"))?;
    print_payment(&payment);
    Ok(())
}

async fn cmd_list(reconciler: &Reconciler, plan_id: &str) -> Result<()> {
    let payments = reconciler
        .list_payments_for_plan(plan_id, &Caller::admin("operator"))
        .await?;
    if payments.is_empty() {
        println!("No payments for plan {plan_id}.");
        return Ok(());
    }
    for p in &payments {
        print_payment(p);
    }
    Ok(())
}

fn print_payment(p: &Payment) {
    println!("Payment: {}", p.external_reference);
    println!("  Status:       {}", p.status);
    println!("  Owner:        {}", p.owner);
    println!("  Amount:       {} cents", p.amount_cents);
    if let Some(plan_id) = &p.plan_id {
        println!("  Plan:         {plan_id}");
    }
    if let Some(id) = &p.gateway_payment_id {
        println!("  Gateway id:   {id}");
    }
    println!(
        "  Created:      {}",
        p.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
}
