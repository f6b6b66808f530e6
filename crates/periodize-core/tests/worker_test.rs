//! Tests for the generation worker and the consumer pool.
//!
//! Uses a FakeRenderer with scripted results and an in-memory file store,
//! so no generative service or filesystem is involved.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use periodize_core::discipline::AthleteData;
use periodize_core::dispatcher::{Dispatcher, GenerationMessage, PgQueuePublisher};
use periodize_core::renderer::{GenerationError, Renderer};
use periodize_core::state::dispatch;
use periodize_core::storage::FileStore;
use periodize_core::worker::{
    DropReason, PoolConfig, ProcessOutcome, Worker, run_worker_pool,
};
use periodize_db::models::{Discipline, Plan, PlanStatus};
use periodize_db::queries::generation_queue;
use periodize_db::queries::plans::{self as plan_db, NewPlan};
use periodize_test_utils::{create_test_db, drop_test_db};

// ===========================================================================
// Fakes
// ===========================================================================

#[derive(Clone, Copy)]
enum Script {
    Succeed,
    FailServer,
    Hang,
    /// Content succeeds, document rendering fails.
    FailDocument,
}

struct FakeRenderer {
    script: Script,
    calls: AtomicUsize,
}

impl FakeRenderer {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn generate_content(
        &self,
        athlete: &AthleteData,
        weeks: i32,
    ) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::Succeed => Ok(format!(
                "{} week plan for {}",
                weeks,
                athlete.profile().name
            )),
            Script::FailServer => Err(GenerationError::from_status(
                503,
                "overloaded".to_string(),
            )),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok("too late".to_string())
            }
            Script::FailDocument => Ok(format!("{weeks} week plan")),
        }
    }

    async fn render_document(
        &self,
        plan: &Plan,
        _athlete: &AthleteData,
        content: &str,
    ) -> Result<Vec<u8>, GenerationError> {
        if let Script::FailDocument = self.script {
            return Err(GenerationError::Parse("document template missing".to_string()));
        }
        Ok(format!("{}\n{content}", plan.plan_id).into_bytes())
    }
}

#[derive(Default)]
struct MemoryFileStore {
    files: Mutex<HashMap<String, Vec<u8>>>,
    read_only: AtomicBool,
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn save(&self, discipline: Discipline, plan_id: &str, bytes: &[u8]) -> Result<String> {
        if self.read_only.load(Ordering::SeqCst) {
            anyhow::bail!("storage is read-only");
        }
        let location = format!("mem://{discipline}/{plan_id}");
        self.files
            .lock()
            .unwrap()
            .insert(location.clone(), bytes.to_vec());
        Ok(location)
    }
}

// ===========================================================================
// Test harness
// ===========================================================================

struct TestHarness {
    pool: PgPool,
    db_name: String,
    store: Arc<MemoryFileStore>,
}

impl TestHarness {
    async fn new() -> Self {
        let (pool, db_name) = create_test_db().await;
        Self {
            pool,
            db_name,
            store: Arc::new(MemoryFileStore::default()),
        }
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn worker(&self, discipline: Discipline, renderer: Arc<FakeRenderer>) -> Worker {
        Worker::new(self.pool.clone(), discipline, renderer, self.store.clone())
    }

    /// A running plan whose payment has been approved.
    async fn approved_plan(&self, plan_id: &str) {
        let athlete = json!({
            "name": "Ana Souza",
            "age": 31,
            "weightKg": 62.5,
            "heightCm": 168,
            "experience": "intermediate",
            "goal": "half marathon",
            "availableDays": 4,
            "weeklyKm": 30
        });
        plan_db::insert_plan(
            &self.pool,
            &NewPlan {
                plan_id,
                owner: "ana@example.com",
                discipline: Discipline::Running,
                athlete: &athlete,
                plan_duration: 8,
                start_date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
                end_date: NaiveDate::from_ymd_opt(2026, 12, 14).unwrap(),
            },
        )
        .await
        .expect("seed plan");
        let mut conn = self.pool.acquire().await.unwrap();
        assert!(dispatch::approve_payment(&mut *conn, plan_id).await.unwrap());
    }

    async fn queued_plan(&self, plan_id: &str) {
        self.approved_plan(plan_id).await;
        dispatch::queue_plan(&self.pool, plan_id, PlanStatus::PaymentApproved)
            .await
            .unwrap();
    }

    async fn plan(&self, plan_id: &str) -> Plan {
        plan_db::get_plan(&self.pool, plan_id)
            .await
            .unwrap()
            .expect("plan should exist")
    }

    async fn teardown(self) {
        self.pool.close().await;
        drop_test_db(&self.db_name).await;
    }
}

fn message(plan_id: &str, discipline: Discipline) -> GenerationMessage {
    GenerationMessage {
        plan_id: plan_id.to_string(),
        owner_identity: "ana@example.com".to_string(),
        discipline,
    }
}

// ===========================================================================
// process
// ===========================================================================

#[tokio::test]
async fn queued_plan_is_generated_and_completed() {
    let h = TestHarness::new().await;
    h.queued_plan("P1").await;
    let renderer = FakeRenderer::new(Script::Succeed);
    let worker = h.worker(Discipline::Running, renderer.clone());

    let outcome = worker.process(&message("P1", Discipline::Running)).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Completed);

    let plan = h.plan("P1").await;
    assert_eq!(plan.status, PlanStatus::Completed);
    assert_eq!(plan.content, "8 week plan for Ana Souza");
    assert_eq!(plan.document_paths, vec!["mem://running/P1".to_string()]);
    assert!(!plan.status.can_generate());
    assert_eq!(renderer.calls(), 1);
    assert!(h.store.files.lock().unwrap().contains_key("mem://running/P1"));

    h.teardown().await;
}

#[tokio::test]
async fn approved_plan_can_be_claimed_directly() {
    let h = TestHarness::new().await;
    h.approved_plan("P1").await;
    let worker = h.worker(Discipline::Running, FakeRenderer::new(Script::Succeed));

    let outcome = worker.process(&message("P1", Discipline::Running)).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Completed);

    h.teardown().await;
}

#[tokio::test]
async fn renderer_failure_marks_plan_failed() {
    let h = TestHarness::new().await;
    h.queued_plan("P1").await;
    let worker = h.worker(Discipline::Running, FakeRenderer::new(Script::FailServer));

    let outcome = worker.process(&message("P1", Discipline::Running)).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Failed { kind: "upstream_5xx" });

    let plan = h.plan("P1").await;
    assert_eq!(plan.status, PlanStatus::Failed);
    assert!(plan.content.is_empty());
    assert!(plan.document_paths.is_empty());
    assert!(plan.status.can_generate());
    assert!(h.store.files.lock().unwrap().is_empty());

    h.teardown().await;
}

#[tokio::test]
async fn document_failure_marks_plan_failed() {
    let h = TestHarness::new().await;
    h.queued_plan("P1").await;
    let renderer = FakeRenderer::new(Script::FailDocument);
    let worker = h.worker(Discipline::Running, renderer.clone());

    let outcome = worker.process(&message("P1", Discipline::Running)).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Failed { kind: "parse" });

    let plan = h.plan("P1").await;
    assert_eq!(plan.status, PlanStatus::Failed);
    assert!(plan.content.is_empty());
    assert!(plan.document_paths.is_empty());
    assert!(plan.status.can_generate());
    assert_eq!(renderer.calls(), 1);
    assert!(h.store.files.lock().unwrap().is_empty());

    h.teardown().await;
}

#[tokio::test]
async fn storage_failure_marks_plan_failed() {
    let h = TestHarness::new().await;
    h.queued_plan("P1").await;
    h.store.read_only.store(true, Ordering::SeqCst);
    let renderer = FakeRenderer::new(Script::Succeed);
    let worker = h.worker(Discipline::Running, renderer.clone());

    let outcome = worker.process(&message("P1", Discipline::Running)).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Failed { kind: "store_write" });

    let plan = h.plan("P1").await;
    assert_eq!(plan.status, PlanStatus::Failed);
    assert!(plan.content.is_empty());
    assert!(plan.document_paths.is_empty());
    assert!(plan.status.can_generate());
    assert_eq!(renderer.calls(), 1);

    h.teardown().await;
}

#[tokio::test]
async fn generation_timeout_marks_plan_failed() {
    let h = TestHarness::new().await;
    h.queued_plan("P1").await;
    let worker = h
        .worker(Discipline::Running, FakeRenderer::new(Script::Hang))
        .with_timeout(Duration::from_millis(100));

    let outcome = worker.process(&message("P1", Discipline::Running)).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Failed { kind: "timeout" });
    assert_eq!(h.plan("P1").await.status, PlanStatus::Failed);

    h.teardown().await;
}

#[tokio::test]
async fn invalid_athlete_data_marks_plan_failed() {
    let h = TestHarness::new().await;
    let athlete = json!({ "name": "Ana Souza" });
    plan_db::insert_plan(
        h.pool(),
        &NewPlan {
            plan_id: "P1",
            owner: "ana@example.com",
            discipline: Discipline::Running,
            athlete: &athlete,
            plan_duration: 4,
            start_date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 11, 16).unwrap(),
        },
    )
    .await
    .unwrap();
    let mut conn = h.pool().acquire().await.unwrap();
    dispatch::approve_payment(&mut *conn, "P1").await.unwrap();
    drop(conn);

    let renderer = FakeRenderer::new(Script::Succeed);
    let worker = h.worker(Discipline::Running, renderer.clone());
    let outcome = worker.process(&message("P1", Discipline::Running)).await.unwrap();

    assert_eq!(outcome, ProcessOutcome::Failed { kind: "invalid_athlete_data" });
    assert_eq!(renderer.calls(), 0);
    assert_eq!(h.plan("P1").await.status, PlanStatus::Failed);

    h.teardown().await;
}

#[tokio::test]
async fn duplicate_delivery_does_not_regenerate() {
    let h = TestHarness::new().await;
    h.queued_plan("P1").await;
    let renderer = FakeRenderer::new(Script::Succeed);
    let worker = h.worker(Discipline::Running, renderer.clone());
    let msg = message("P1", Discipline::Running);

    assert_eq!(worker.process(&msg).await.unwrap(), ProcessOutcome::Completed);
    let first = h.plan("P1").await;

    let outcome = worker.process(&msg).await.unwrap();
    assert_eq!(
        outcome,
        ProcessOutcome::Dropped(DropReason::NotClaimable(PlanStatus::Completed))
    );
    assert_eq!(renderer.calls(), 1);
    assert_eq!(h.plan("P1").await.content, first.content);

    h.teardown().await;
}

#[tokio::test]
async fn concurrent_duplicates_generate_once() {
    let h = TestHarness::new().await;
    h.queued_plan("P1").await;
    let renderer = FakeRenderer::new(Script::Succeed);
    let a = h.worker(Discipline::Running, renderer.clone());
    let b = h.worker(Discipline::Running, renderer.clone());
    let msg = message("P1", Discipline::Running);

    let (ra, rb) = tokio::join!(a.process(&msg), b.process(&msg));
    let outcomes = [ra.unwrap(), rb.unwrap()];
    let completed = outcomes
        .iter()
        .filter(|o| **o == ProcessOutcome::Completed)
        .count();

    assert_eq!(completed, 1, "{outcomes:?}");
    assert_eq!(renderer.calls(), 1);
    assert_eq!(h.plan("P1").await.status, PlanStatus::Completed);

    h.teardown().await;
}

#[tokio::test]
async fn messages_for_missing_or_foreign_plans_are_dropped() {
    let h = TestHarness::new().await;
    h.queued_plan("P1").await;
    let renderer = FakeRenderer::new(Script::Succeed);

    let running = h.worker(Discipline::Running, renderer.clone());
    let outcome = running
        .process(&message("missing", Discipline::Running))
        .await
        .unwrap();
    assert_eq!(outcome, ProcessOutcome::Dropped(DropReason::PlanNotFound));

    let cycling = h.worker(Discipline::Cycling, renderer.clone());
    let outcome = cycling.process(&message("P1", Discipline::Cycling)).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Dropped(DropReason::WrongDiscipline(_))));

    assert_eq!(renderer.calls(), 0);
    assert_eq!(h.plan("P1").await.status, PlanStatus::Queued);

    h.teardown().await;
}

#[tokio::test]
async fn pending_plan_is_not_generated() {
    let h = TestHarness::new().await;
    let athlete = json!({});
    plan_db::insert_plan(
        h.pool(),
        &NewPlan {
            plan_id: "P1",
            owner: "ana@example.com",
            discipline: Discipline::Running,
            athlete: &athlete,
            plan_duration: 4,
            start_date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 11, 16).unwrap(),
        },
    )
    .await
    .unwrap();

    let worker = h.worker(Discipline::Running, FakeRenderer::new(Script::Succeed));
    let outcome = worker.process(&message("P1", Discipline::Running)).await.unwrap();
    assert_eq!(
        outcome,
        ProcessOutcome::Dropped(DropReason::NotClaimable(PlanStatus::PaymentPending))
    );

    h.teardown().await;
}

// ===========================================================================
// Pool
// ===========================================================================

#[tokio::test]
async fn pool_consumes_dispatched_messages() {
    let h = TestHarness::new().await;
    h.queued_plan("P1").await;
    h.queued_plan("P2").await;

    let dispatcher = Dispatcher::new(Arc::new(PgQueuePublisher::new(h.pool().clone())));
    dispatcher
        .enqueue("P1", "ana@example.com", Discipline::Running)
        .await
        .unwrap();
    dispatcher
        .enqueue("P2", "ana@example.com", Discipline::Running)
        .await
        .unwrap();
    // A duplicate of P1, as a broker redelivery would produce.
    dispatcher
        .enqueue("P1", "ana@example.com", Discipline::Running)
        .await
        .unwrap();

    let renderer = FakeRenderer::new(Script::Succeed);
    let workers = vec![Arc::new(h.worker(Discipline::Running, renderer.clone()))];
    let config = PoolConfig {
        concurrency: 2,
        lease: Duration::from_secs(60),
        poll_interval: Duration::from_millis(20),
    };
    let cancel = CancellationToken::new();
    let pool = h.pool().clone();
    let pool_cancel = cancel.clone();
    let handle =
        tokio::spawn(async move { run_worker_pool(&pool, workers, &config, pool_cancel).await });

    let queue = "plan-generation-running-queue";
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let pending = generation_queue::pending_count(h.pool(), queue).await.unwrap();
        let done = h.plan("P1").await.status == PlanStatus::Completed
            && h.plan("P2").await.status == PlanStatus::Completed;
        if pending == 0 && done {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "pool did not drain the queue (pending {pending})"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    cancel.cancel();
    handle.await.unwrap().unwrap();
    assert_eq!(renderer.calls(), 2);

    h.teardown().await;
}

#[tokio::test]
async fn pool_stops_on_cancel_with_empty_queue() {
    let h = TestHarness::new().await;
    let workers = Discipline::ALL
        .iter()
        .map(|d| Arc::new(h.worker(*d, FakeRenderer::new(Script::Succeed))))
        .collect();
    let cancel = CancellationToken::new();
    cancel.cancel();

    tokio::time::timeout(
        Duration::from_secs(5),
        run_worker_pool(h.pool(), workers, &PoolConfig::default(), cancel),
    )
    .await
    .expect("pool should stop promptly")
    .unwrap();

    h.teardown().await;
}
