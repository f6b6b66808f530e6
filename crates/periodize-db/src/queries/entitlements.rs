//! Database query functions for the `entitlements` table.

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgPool};

use crate::models::Entitlement;

/// Activate (or extend) an owner's entitlement: set the tier, push the
/// expiry to `months` from now and bump the activation counter.
pub async fn activate(
    conn: &mut PgConnection,
    owner: &str,
    tier: &str,
    months: i32,
) -> Result<Entitlement> {
    let entitlement = sqlx::query_as::<_, Entitlement>(
        "INSERT INTO entitlements (owner, tier, expires_at, activations) \
         VALUES ($1, $2, now() + make_interval(months => $3), 1) \
         ON CONFLICT (owner) DO UPDATE \
         SET tier = EXCLUDED.tier, \
             expires_at = EXCLUDED.expires_at, \
             activations = entitlements.activations + 1, \
             updated_at = now() \
         RETURNING *",
    )
    .bind(owner)
    .bind(tier)
    .bind(months)
    .fetch_one(conn)
    .await
    .with_context(|| format!("failed to activate entitlement for {owner}"))?;

    Ok(entitlement)
}

/// Fetch an owner's entitlement, if any.
pub async fn get_entitlement(pool: &PgPool, owner: &str) -> Result<Option<Entitlement>> {
    let entitlement =
        sqlx::query_as::<_, Entitlement>("SELECT * FROM entitlements WHERE owner = $1")
            .bind(owner)
            .fetch_optional(pool)
            .await
            .context("failed to fetch entitlement")?;

    Ok(entitlement)
}
