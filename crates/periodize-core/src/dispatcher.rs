//! Generation Dispatcher: publishes a generation message onto the fixed
//! route of the plan's discipline.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use periodize_db::models::Discipline;
use periodize_db::queries::generation_queue;

use crate::discipline::{self, Route};

/// Request to generate one plan. Consuming it more than once is safe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationMessage {
    pub plan_id: String,
    pub owner_identity: String,
    pub discipline: Discipline,
}

/// Transport a dispatcher publishes through.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, route: &Route, message: &GenerationMessage) -> Result<()>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn MessagePublisher) {}
};

/// Publishes onto the Postgres `generation_queue` table.
#[derive(Debug, Clone)]
pub struct PgQueuePublisher {
    pool: PgPool,
}

impl PgQueuePublisher {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessagePublisher for PgQueuePublisher {
    async fn publish(&self, route: &Route, message: &GenerationMessage) -> Result<()> {
        let payload =
            serde_json::to_value(message).context("failed to encode generation message")?;
        let id = generation_queue::publish(
            &self.pool,
            &route.queue_name,
            &route.routing_key,
            &payload,
        )
        .await?;
        tracing::debug!(message_id = id, queue = %route.queue_name, "message published");
        Ok(())
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    publisher: Arc<dyn MessagePublisher>,
}

impl Dispatcher {
    pub fn new(publisher: Arc<dyn MessagePublisher>) -> Self {
        Self { publisher }
    }

    /// Publish a generation message for a plan that is already `queued`.
    pub async fn enqueue(
        &self,
        plan_id: &str,
        owner_identity: &str,
        discipline: Discipline,
    ) -> Result<()> {
        let route = discipline::route(discipline);
        let message = GenerationMessage {
            plan_id: plan_id.to_string(),
            owner_identity: owner_identity.to_string(),
            discipline,
        };
        self.publisher
            .publish(&route, &message)
            .await
            .with_context(|| format!("failed to enqueue plan {plan_id} on {}", route.routing_key))?;

        tracing::info!(
            plan_id,
            discipline = %discipline,
            exchange = discipline::EXCHANGE,
            routing_key = %route.routing_key,
            "generation requested"
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records published messages, or fails every publish.
    #[derive(Default)]
    pub struct RecordingPublisher {
        pub fail: bool,
        pub published: Mutex<Vec<(Route, GenerationMessage)>>,
    }

    #[async_trait]
    impl MessagePublisher for RecordingPublisher {
        async fn publish(&self, route: &Route, message: &GenerationMessage) -> Result<()> {
            if self.fail {
                anyhow::bail!("broker unavailable");
            }
            self.published
                .lock()
                .unwrap()
                .push((route.clone(), message.clone()));
            Ok(())
        }
    }
}
