//! Consumer pool: one polling loop per discipline feeding a bounded set of
//! in-flight `process` calls.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use periodize_db::models::QueuedMessage;
use periodize_db::queries::generation_queue;

use super::Worker;
use crate::discipline;
use crate::dispatcher::GenerationMessage;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum concurrent `process` calls across all disciplines.
    pub concurrency: usize,
    /// How long a claimed message stays invisible to other consumers.
    /// Must exceed the generation timeout.
    pub lease: Duration,
    /// Sleep between polls of an empty queue.
    pub poll_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            lease: Duration::from_secs(600),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Run consumers for every worker until `cancel` fires.
///
/// Cancellation stops new claims; deliveries already being processed run to
/// completion before this returns.
pub async fn run_worker_pool(
    pool: &PgPool,
    workers: Vec<Arc<Worker>>,
    config: &PoolConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let permits = config.concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(permits));

    tracing::info!(
        disciplines = workers.len(),
        concurrency = permits,
        "worker pool started"
    );

    let consumers = workers.into_iter().map(|worker| {
        consume(
            pool.clone(),
            worker,
            Arc::clone(&semaphore),
            config.clone(),
            cancel.clone(),
        )
    });
    let results = futures::future::join_all(consumers).await;

    // Every in-flight delivery holds a permit.
    let _drained = semaphore
        .acquire_many(permits as u32)
        .await
        .context("worker semaphore closed")?;
    tracing::info!("worker pool stopped");

    results.into_iter().collect()
}

async fn consume(
    pool: PgPool,
    worker: Arc<Worker>,
    semaphore: Arc<Semaphore>,
    config: PoolConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let route = discipline::route(worker.discipline());
    tracing::info!(queue = %route.queue_name, "consumer started");

    loop {
        let permit = tokio::select! {
            permit = Arc::clone(&semaphore).acquire_owned() => {
                permit.context("worker semaphore closed")?
            }
            _ = cancel.cancelled() => break,
        };

        let claimed =
            match generation_queue::claim_next(&pool, &route.queue_name, config.lease).await {
                Ok(claimed) => claimed,
                Err(e) => {
                    tracing::warn!(queue = %route.queue_name, error = %e, "failed to poll queue");
                    None
                }
            };

        let Some(delivery) = claimed else {
            drop(permit);
            tokio::select! {
                _ = tokio::time::sleep(config.poll_interval) => {}
                _ = cancel.cancelled() => break,
            }
            continue;
        };

        let pool = pool.clone();
        let worker = Arc::clone(&worker);
        tokio::spawn(handle_delivery(pool, worker, delivery, permit));
    }

    tracing::info!(queue = %route.queue_name, "consumer stopped");
    Ok(())
}

async fn handle_delivery(
    pool: PgPool,
    worker: Arc<Worker>,
    delivery: QueuedMessage,
    _permit: OwnedSemaphorePermit,
) {
    let message: GenerationMessage = match serde_json::from_value(delivery.payload.clone()) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(message_id = delivery.id, error = %e, "undecodable message, dropping");
            ack(&pool, delivery.id).await;
            return;
        }
    };

    tracing::debug!(
        message_id = delivery.id,
        plan_id = %message.plan_id,
        delivery_count = delivery.delivery_count,
        "processing delivery"
    );

    match worker.process(&message).await {
        Ok(outcome) => {
            tracing::debug!(plan_id = %message.plan_id, ?outcome, "delivery processed");
            ack(&pool, delivery.id).await;
        }
        Err(e) => {
            // Left unacknowledged: redelivered once the lease runs out.
            tracing::error!(
                message_id = delivery.id,
                plan_id = %message.plan_id,
                error = %e,
                "could not read plan store, message will be redelivered"
            );
        }
    }
}

async fn ack(pool: &PgPool, id: i64) {
    if let Err(e) = generation_queue::ack(pool, id).await {
        tracing::warn!(message_id = id, error = %e, "failed to ack message");
    }
}
