//! Database query functions for the `generation_queue` table.
//!
//! The table behaves as a set of named queues with competing consumers.
//! A consumer claims the oldest unacknowledged message whose lease is free
//! (`FOR UPDATE SKIP LOCKED`), and acknowledges it when done. A message
//! whose lease runs out before the ack is delivered again.

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::QueuedMessage;

/// Append a message to a queue. Returns the message id.
pub async fn publish(
    pool: &PgPool,
    queue_name: &str,
    routing_key: &str,
    payload: &serde_json::Value,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO generation_queue (queue_name, routing_key, payload) \
         VALUES ($1, $2, $3) \
         RETURNING id",
    )
    .bind(queue_name)
    .bind(routing_key)
    .bind(payload)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to publish to {queue_name}"))?;

    Ok(id)
}

/// Claim the next deliverable message on `queue_name`, leasing it for
/// `lease`. Returns `None` when nothing is deliverable.
pub async fn claim_next(
    pool: &PgPool,
    queue_name: &str,
    lease: Duration,
) -> Result<Option<QueuedMessage>> {
    let message = sqlx::query_as::<_, QueuedMessage>(
        "UPDATE generation_queue \
         SET delivery_count = delivery_count + 1, \
             lease_expires_at = now() + make_interval(secs => $2) \
         WHERE id = ( \
             SELECT id FROM generation_queue \
             WHERE queue_name = $1 \
               AND acked_at IS NULL \
               AND (lease_expires_at IS NULL OR lease_expires_at < now()) \
             ORDER BY id \
             FOR UPDATE SKIP LOCKED \
             LIMIT 1 \
         ) \
         RETURNING *",
    )
    .bind(queue_name)
    .bind(lease.as_secs_f64())
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to claim message from {queue_name}"))?;

    Ok(message)
}

/// Acknowledge a delivered message so it is never delivered again.
pub async fn ack(pool: &PgPool, id: i64) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE generation_queue SET acked_at = now() WHERE id = $1 AND acked_at IS NULL",
    )
    .bind(id)
    .execute(pool)
    .await
    .context("failed to ack message")?;

    Ok(result.rows_affected())
}

/// Number of unacknowledged messages on a queue.
pub async fn pending_count(pool: &PgPool, queue_name: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM generation_queue WHERE queue_name = $1 AND acked_at IS NULL",
    )
    .bind(queue_name)
    .fetch_one(pool)
    .await
    .context("failed to count pending messages")?;

    Ok(count)
}
