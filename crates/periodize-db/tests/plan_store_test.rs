//! Integration tests for the plan record store.

use chrono::NaiveDate;
use serde_json::json;

use periodize_db::models::{Discipline, PlanStatus};
use periodize_db::pool;
use periodize_db::queries::plans::{self, NewPlan};
use periodize_test_utils::{create_test_db, drop_test_db};

async fn insert(pool: &sqlx::PgPool, plan_id: &str, discipline: Discipline) -> periodize_db::models::Plan {
    let athlete = json!({ "name": "Ana", "age": 31 });
    plans::insert_plan(
        pool,
        &NewPlan {
            plan_id,
            owner: "ana@example.com",
            discipline,
            athlete: &athlete,
            plan_duration: 4,
            start_date: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 2, 2).unwrap(),
        },
    )
    .await
    .expect("insert_plan should succeed")
}

#[tokio::test]
async fn migrations_create_expected_tables() {
    let (pool, db_name) = create_test_db().await;

    let counts = pool::table_counts(&pool).await.unwrap();
    let names: Vec<&str> = counts.iter().map(|(n, _)| n.as_str()).collect();
    for expected in [
        "entitlements",
        "generation_queue",
        "payment_creation_guards",
        "payments",
        "plans",
    ] {
        assert!(names.contains(&expected), "missing table {expected}: {names:?}");
    }

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn insert_plan_starts_pending_and_empty() {
    let (pool, db_name) = create_test_db().await;

    let plan = insert(&pool, "P1", Discipline::Running).await;
    assert_eq!(plan.status, PlanStatus::PaymentPending);
    assert!(plan.content.is_empty());
    assert!(plan.document_paths.is_empty());
    assert_eq!(plan.athlete["name"], "Ana");

    let fetched = plans::get_plan(&pool, "P1").await.unwrap().unwrap();
    assert_eq!(fetched.discipline, Discipline::Running);
    assert!(plans::get_plan(&pool, "missing").await.unwrap().is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn transition_is_compare_and_set() {
    let (pool, db_name) = create_test_db().await;
    insert(&pool, "P1", Discipline::General).await;

    let rows = plans::transition_plan_status(
        &pool,
        "P1",
        PlanStatus::Queued,
        PlanStatus::Generating,
    )
    .await
    .unwrap();
    assert_eq!(rows, 0, "status did not match, nothing should change");

    let rows = plans::transition_plan_status(
        &pool,
        "P1",
        PlanStatus::PaymentPending,
        PlanStatus::PaymentApproved,
    )
    .await
    .unwrap();
    assert_eq!(rows, 1);

    let plan = plans::get_plan(&pool, "P1").await.unwrap().unwrap();
    assert_eq!(plan.status, PlanStatus::PaymentApproved);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn claim_respects_status_and_discipline() {
    let (pool, db_name) = create_test_db().await;
    insert(&pool, "P1", Discipline::Strength).await;

    // payment_pending is not claimable.
    assert!(
        plans::claim_for_generation(&pool, "P1", Discipline::Strength)
            .await
            .unwrap()
            .is_none()
    );

    plans::transition_plan_status(&pool, "P1", PlanStatus::PaymentPending, PlanStatus::PaymentApproved)
        .await
        .unwrap();

    // Wrong discipline.
    assert!(
        plans::claim_for_generation(&pool, "P1", Discipline::Cycling)
            .await
            .unwrap()
            .is_none()
    );

    let claimed = plans::claim_for_generation(&pool, "P1", Discipline::Strength)
        .await
        .unwrap()
        .expect("approved plan should be claimable");
    assert_eq!(claimed.status, PlanStatus::Generating);

    // A second claim loses.
    assert!(
        plans::claim_for_generation(&pool, "P1", Discipline::Strength)
            .await
            .unwrap()
            .is_none()
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn concurrent_claims_have_one_winner() {
    let (pool, db_name) = create_test_db().await;
    insert(&pool, "P1", Discipline::Running).await;
    plans::transition_plan_status(&pool, "P1", PlanStatus::PaymentPending, PlanStatus::PaymentApproved)
        .await
        .unwrap();
    plans::transition_plan_status(&pool, "P1", PlanStatus::PaymentApproved, PlanStatus::Queued)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            plans::claim_for_generation(&pool, "P1", Discipline::Running)
                .await
                .unwrap()
                .is_some()
        }));
    }
    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn complete_only_from_generating() {
    let (pool, db_name) = create_test_db().await;
    insert(&pool, "P1", Discipline::Cycling).await;

    let paths = vec!["cycling/P1.txt".to_string()];
    let rows = plans::complete_plan(&pool, "P1", "week 1 ...", &paths).await.unwrap();
    assert_eq!(rows, 0);

    plans::transition_plan_status(&pool, "P1", PlanStatus::PaymentPending, PlanStatus::PaymentApproved)
        .await
        .unwrap();
    plans::claim_for_generation(&pool, "P1", Discipline::Cycling)
        .await
        .unwrap()
        .unwrap();

    let rows = plans::complete_plan(&pool, "P1", "week 1 ...", &paths).await.unwrap();
    assert_eq!(rows, 1);

    let plan = plans::get_plan(&pool, "P1").await.unwrap().unwrap();
    assert_eq!(plan.status, PlanStatus::Completed);
    assert_eq!(plan.content, "week 1 ...");
    assert_eq!(plan.document_paths, paths);

    // Completed is terminal for failure too.
    assert_eq!(plans::fail_plan(&pool, "P1").await.unwrap(), 0);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn content_requires_completed_status() {
    let (pool, db_name) = create_test_db().await;
    insert(&pool, "P1", Discipline::General).await;

    let result = sqlx::query("UPDATE plans SET content = 'sneaky' WHERE plan_id = 'P1'")
        .execute(&pool)
        .await;
    assert!(result.is_err(), "check constraint should reject content outside completed");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn stale_generating_plans_are_failed() {
    let (pool, db_name) = create_test_db().await;
    insert(&pool, "P1", Discipline::General).await;
    plans::transition_plan_status(&pool, "P1", PlanStatus::PaymentPending, PlanStatus::PaymentApproved)
        .await
        .unwrap();
    plans::claim_for_generation(&pool, "P1", Discipline::General)
        .await
        .unwrap()
        .unwrap();

    let none = plans::fail_stale_generating(&pool, std::time::Duration::from_secs(3600))
        .await
        .unwrap();
    assert!(none.is_empty());

    sqlx::query("UPDATE plans SET updated_at = now() - interval '2 hours' WHERE plan_id = 'P1'")
        .execute(&pool)
        .await
        .unwrap();

    let reset = plans::fail_stale_generating(&pool, std::time::Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(reset.len(), 1);
    assert_eq!(reset[0].status, PlanStatus::Failed);

    pool.close().await;
    drop_test_db(&db_name).await;
}
