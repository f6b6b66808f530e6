//! Integration tests for plan state transitions against a real database.

use chrono::NaiveDate;
use serde_json::json;
use sqlx::PgPool;

use periodize_core::state::PlanStateMachine;
use periodize_core::state::dispatch;
use periodize_db::models::{Discipline, PlanStatus};
use periodize_db::queries::plans::{self as plan_db, NewPlan};
use periodize_test_utils::{create_test_db, drop_test_db};

// ===========================================================================
// Test harness
// ===========================================================================

struct TestHarness {
    pool: PgPool,
    db_name: String,
}

impl TestHarness {
    async fn new() -> Self {
        let (pool, db_name) = create_test_db().await;
        Self { pool, db_name }
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn seed_plan(&self, plan_id: &str) {
        let athlete = json!({ "name": "Ana Souza" });
        plan_db::insert_plan(
            &self.pool,
            &NewPlan {
                plan_id,
                owner: "ana@example.com",
                discipline: Discipline::Strength,
                athlete: &athlete,
                plan_duration: 6,
                start_date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
                end_date: NaiveDate::from_ymd_opt(2026, 11, 30).unwrap(),
            },
        )
        .await
        .expect("seed plan");
    }

    async fn status(&self, plan_id: &str) -> PlanStatus {
        plan_db::get_plan(&self.pool, plan_id)
            .await
            .unwrap()
            .expect("plan should exist")
            .status
    }

    async fn approve(&self, plan_id: &str) {
        let mut conn = self.pool.acquire().await.unwrap();
        assert!(dispatch::approve_payment(&mut *conn, plan_id).await.unwrap());
    }

    async fn teardown(self) {
        self.pool.close().await;
        drop_test_db(&self.db_name).await;
    }
}

// ===========================================================================
// Transitions
// ===========================================================================

#[tokio::test]
async fn full_forward_path() {
    let h = TestHarness::new().await;
    h.seed_plan("P1").await;

    h.approve("P1").await;
    assert_eq!(h.status("P1").await, PlanStatus::PaymentApproved);

    dispatch::queue_plan(h.pool(), "P1", PlanStatus::PaymentApproved)
        .await
        .unwrap();
    assert_eq!(h.status("P1").await, PlanStatus::Queued);

    let claimed = dispatch::claim_for_generation(h.pool(), "P1", Discipline::Strength)
        .await
        .unwrap()
        .expect("queued plan should be claimable");
    assert_eq!(claimed.status, PlanStatus::Generating);

    dispatch::complete_generation(h.pool(), "P1", "Week 1: squat", &["/tmp/P1.txt".into()])
        .await
        .unwrap();
    let plan = plan_db::get_plan(h.pool(), "P1").await.unwrap().unwrap();
    assert_eq!(plan.status, PlanStatus::Completed);
    assert_eq!(plan.content, "Week 1: squat");
    assert_eq!(plan.document_paths, vec!["/tmp/P1.txt".to_string()]);

    h.teardown().await;
}

#[tokio::test]
async fn invalid_edges_are_rejected_without_writing() {
    let h = TestHarness::new().await;
    h.seed_plan("P1").await;

    let err = PlanStateMachine::transition(
        h.pool(),
        "P1",
        PlanStatus::PaymentPending,
        PlanStatus::Queued,
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("invalid state transition"));
    assert_eq!(h.status("P1").await, PlanStatus::PaymentPending);

    h.teardown().await;
}

#[tokio::test]
async fn completion_requires_content_path() {
    let h = TestHarness::new().await;
    h.seed_plan("P1").await;

    let err = PlanStateMachine::transition(
        h.pool(),
        "P1",
        PlanStatus::Generating,
        PlanStatus::Completed,
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("together with its content"));

    h.teardown().await;
}

#[tokio::test]
async fn stale_from_status_is_a_lock_failure() {
    let h = TestHarness::new().await;
    h.seed_plan("P1").await;
    h.approve("P1").await;

    dispatch::queue_plan(h.pool(), "P1", PlanStatus::PaymentApproved)
        .await
        .unwrap();
    let err = dispatch::queue_plan(h.pool(), "P1", PlanStatus::PaymentApproved)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("optimistic lock failed"), "{err}");

    let err = dispatch::queue_plan(h.pool(), "missing", PlanStatus::Failed)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not found"), "{err}");

    h.teardown().await;
}

#[tokio::test]
async fn failed_plan_can_be_requeued() {
    let h = TestHarness::new().await;
    h.seed_plan("P1").await;
    h.approve("P1").await;
    dispatch::queue_plan(h.pool(), "P1", PlanStatus::PaymentApproved)
        .await
        .unwrap();

    dispatch::fail_enqueue(h.pool(), "P1").await.unwrap();
    assert_eq!(h.status("P1").await, PlanStatus::Failed);
    assert!(PlanStatus::Failed.can_generate());

    dispatch::queue_plan(h.pool(), "P1", PlanStatus::Failed)
        .await
        .unwrap();
    assert_eq!(h.status("P1").await, PlanStatus::Queued);

    h.teardown().await;
}

#[tokio::test]
async fn approval_only_moves_pending_plans() {
    let h = TestHarness::new().await;
    h.seed_plan("P1").await;
    h.approve("P1").await;

    let mut conn = h.pool().acquire().await.unwrap();
    let again = dispatch::approve_payment(&mut *conn, "P1").await.unwrap();
    assert!(!again, "second approval must be a no-op");
    drop(conn);
    assert_eq!(h.status("P1").await, PlanStatus::PaymentApproved);

    h.teardown().await;
}

#[tokio::test]
async fn concurrent_claims_have_one_winner() {
    let h = TestHarness::new().await;
    h.seed_plan("P1").await;
    h.approve("P1").await;

    let (a, b) = tokio::join!(
        dispatch::claim_for_generation(h.pool(), "P1", Discipline::Strength),
        dispatch::claim_for_generation(h.pool(), "P1", Discipline::Strength),
    );
    let winners = [a.unwrap(), b.unwrap()]
        .into_iter()
        .filter(Option::is_some)
        .count();
    assert_eq!(winners, 1);
    assert_eq!(h.status("P1").await, PlanStatus::Generating);

    h.teardown().await;
}

#[tokio::test]
async fn claim_checks_discipline() {
    let h = TestHarness::new().await;
    h.seed_plan("P1").await;
    h.approve("P1").await;

    let claimed = dispatch::claim_for_generation(h.pool(), "P1", Discipline::Cycling)
        .await
        .unwrap();
    assert!(claimed.is_none());
    assert_eq!(h.status("P1").await, PlanStatus::PaymentApproved);

    h.teardown().await;
}

#[tokio::test]
async fn failure_keeps_content_empty() {
    let h = TestHarness::new().await;
    h.seed_plan("P1").await;
    h.approve("P1").await;
    dispatch::claim_for_generation(h.pool(), "P1", Discipline::Strength)
        .await
        .unwrap()
        .unwrap();

    assert!(dispatch::fail_generation(h.pool(), "P1").await.unwrap());
    let plan = plan_db::get_plan(h.pool(), "P1").await.unwrap().unwrap();
    assert_eq!(plan.status, PlanStatus::Failed);
    assert!(plan.content.is_empty());

    // Already failed: nothing to do.
    assert!(!dispatch::fail_generation(h.pool(), "P1").await.unwrap());

    h.teardown().await;
}

#[tokio::test]
async fn late_failure_leaves_requeued_plan_alone() {
    let h = TestHarness::new().await;
    h.seed_plan("P1").await;
    h.approve("P1").await;
    dispatch::claim_for_generation(h.pool(), "P1", Discipline::Strength)
        .await
        .unwrap()
        .unwrap();

    // The attempt is reset as stale and the plan queued again while the
    // original worker is still running.
    let reset = plan_db::fail_stale_generating(h.pool(), std::time::Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(reset.len(), 1);
    assert_eq!(reset[0].plan_id, "P1");
    dispatch::queue_plan(h.pool(), "P1", PlanStatus::Failed).await.unwrap();

    assert!(!dispatch::fail_generation(h.pool(), "P1").await.unwrap());
    assert_eq!(h.status("P1").await, PlanStatus::Queued);

    h.teardown().await;
}
