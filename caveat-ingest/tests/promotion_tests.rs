//! Promotion engine tests: idempotency, cross-batch dedup, plan mode,
//! publish of a staged batch, run-lock exclusion and rollback.

mod helpers;

use caveat_common::Error;
use caveat_ingest::db::{batches, lock, staging};
use caveat_ingest::models::BatchStatus;
use caveat_ingest::pipeline::{self, promote, RunMode};
use helpers::*;
use uuid::Uuid;

#[tokio::test]
async fn cross_batch_overlap_never_duplicates_a_natural_key() {
    let env = test_env().await;

    let week1 = standard_rows(10);
    let file1 = write_csv(env.path(), "week1.csv", STANDARD_HEADER, &week1);
    pipeline::run_ingest(&env.ctx, &[file1], RunMode::Full, false)
        .await
        .unwrap();
    assert_eq!(production_count(&env.ctx).await, 10);

    // Week 2 re-delivers rows 5..10 and adds 5 new ones
    let week2: Vec<String> = (5..15).map(standard_row).collect();
    let file2 = write_csv(env.path(), "week2.csv", STANDARD_HEADER, &week2);
    let outcome = pipeline::run_ingest(&env.ctx, &[file2], RunMode::Full, false)
        .await
        .unwrap();

    assert_eq!(outcome.batch.rows_loaded, 10);
    assert_eq!(outcome.batch.rows_after_dedup, 10);
    // Only the 5 genuinely new rows inserted; overlaps were silent no-ops
    assert_eq!(outcome.batch.rows_promoted, 5);
    assert_eq!(production_count(&env.ctx).await, 15);

    // No hash appears twice
    let distinct: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT row_hash) FROM transactions")
        .fetch_one(&env.ctx.pool)
        .await
        .unwrap();
    assert_eq!(distinct, 15);
}

#[tokio::test]
async fn staging_only_batch_publishes_later() {
    let env = test_env().await;
    let file = write_csv(env.path(), "week.csv", STANDARD_HEADER, &standard_rows(8));

    let outcome = pipeline::run_ingest(&env.ctx, &[file], RunMode::StagingOnly, false)
        .await
        .unwrap();
    assert_eq!(outcome.batch.status, BatchStatus::Ready);
    assert_eq!(outcome.batch.rows_promoted, 0);
    assert_eq!(production_count(&env.ctx).await, 0);

    let published = pipeline::publish_ready(&env.ctx).await.unwrap();
    assert_eq!(published.batch_id, outcome.batch.batch_id);
    assert_eq!(published.status, BatchStatus::Completed);
    assert_eq!(published.rows_promoted, 8);
    assert_eq!(production_count(&env.ctx).await, 8);
}

#[tokio::test]
async fn publish_with_no_ready_batch_is_not_found() {
    let env = test_env().await;
    let err = pipeline::publish_ready(&env.ctx).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn plan_mode_reports_the_diff_without_writing() {
    let env = test_env().await;

    // Promote a first week so the plan has overlap to report
    let week1 = standard_rows(6);
    let file1 = write_csv(env.path(), "week1.csv", STANDARD_HEADER, &week1);
    pipeline::run_ingest(&env.ctx, &[file1], RunMode::Full, false)
        .await
        .unwrap();

    let week2: Vec<String> = (3..9).map(standard_row).collect();
    let file2 = write_csv(env.path(), "week2.csv", STANDARD_HEADER, &week2);
    let outcome = pipeline::run_ingest(&env.ctx, &[file2], RunMode::Plan, false)
        .await
        .unwrap();

    let plan = outcome.plan.expect("plan mode returns a diff");
    assert_eq!(plan.new_rows, 3);
    assert_eq!(plan.hash_collisions, 3);
    assert_eq!(plan.outlier_count, 0);
    assert!(plan.date_window.is_some());
    assert!(plan.new_districts.is_empty());

    // No production writes, batch parked in ready
    assert_eq!(production_count(&env.ctx).await, 6);
    assert_eq!(outcome.batch.status, BatchStatus::Ready);
    assert!(plan.render().contains("no production writes"));
}

#[tokio::test]
async fn second_run_fails_fast_while_lock_is_held() {
    let env = test_env().await;
    lock::acquire_run_lock(&env.ctx.pool, Uuid::new_v4())
        .await
        .unwrap();

    let file = write_csv(env.path(), "week.csv", STANDARD_HEADER, &standard_rows(5));
    let err = pipeline::run_ingest(&env.ctx, &[file.clone()], RunMode::Full, false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::LockHeld(_)));
    assert_eq!(production_count(&env.ctx).await, 0);

    // Released lock clears the way
    lock::release_run_lock(&env.ctx.pool).await.unwrap();
    let outcome = pipeline::run_ingest(&env.ctx, &[file], RunMode::Full, false)
        .await
        .unwrap();
    assert_eq!(outcome.batch.status, BatchStatus::Completed);
}

#[tokio::test]
async fn lock_is_released_after_a_hard_failure() {
    let env = test_env().await;
    // Missing required column -> compat hard failure mid-run
    let file = write_csv(
        env.path(),
        "broken.csv",
        "project,price,area_sqft",
        &["A,1000000,900.0".to_string()],
    );
    pipeline::run_ingest(&env.ctx, &[file], RunMode::Full, false)
        .await
        .unwrap_err();

    // A subsequent run must be able to take the lock
    let ok = write_csv(env.path(), "ok.csv", STANDARD_HEADER, &standard_rows(5));
    let outcome = pipeline::run_ingest(&env.ctx, &[ok], RunMode::Full, false)
        .await
        .unwrap();
    assert_eq!(outcome.batch.status, BatchStatus::Completed);
}

#[tokio::test]
async fn rollback_reverts_the_latest_completed_batch() {
    let env = test_env().await;
    let file1 = write_csv(env.path(), "w1.csv", STANDARD_HEADER, &standard_rows(6));
    pipeline::run_ingest(&env.ctx, &[file1], RunMode::Full, false)
        .await
        .unwrap();

    let week2: Vec<String> = (6..10).map(standard_row).collect();
    let file2 = write_csv(env.path(), "w2.csv", STANDARD_HEADER, &week2);
    let second = pipeline::run_ingest(&env.ctx, &[file2], RunMode::Full, false)
        .await
        .unwrap();
    assert_eq!(production_count(&env.ctx).await, 10);

    let rolled = pipeline::rollback_latest(&env.ctx).await.unwrap();
    assert_eq!(rolled.batch_id, second.batch.batch_id);
    assert_eq!(rolled.status, BatchStatus::RolledBack);
    // Only the second batch's rows are gone
    assert_eq!(production_count(&env.ctx).await, 6);

    // The audit record reflects the terminal state
    let reloaded = batches::load_batch(&env.ctx.pool, rolled.batch_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.status, BatchStatus::RolledBack);
}

#[tokio::test]
async fn republishing_a_promoted_batch_is_idempotent() {
    let env = test_env().await;
    let file = write_csv(env.path(), "week.csv", STANDARD_HEADER, &standard_rows(7));
    let outcome = pipeline::run_ingest(&env.ctx, &[file], RunMode::Full, false)
        .await
        .unwrap();
    assert_eq!(outcome.batch.rows_promoted, 7);

    // Driving the promotion again directly: every insert is a no-op
    let rows = staging::load_rows(&env.ctx.pool, outcome.batch.batch_id)
        .await
        .unwrap();
    let promoted = promote::publish(&env.ctx.pool, &outcome.batch, &rows)
        .await
        .unwrap();
    assert_eq!(promoted, 0);
    assert_eq!(production_count(&env.ctx).await, 7);
}

#[tokio::test]
async fn batch_audit_record_round_trips() {
    let env = test_env().await;
    let file = write_csv(
        env.path(),
        "week.csv",
        "Project Name,sale_date,price,area_sqft,floor_range,district",
        &standard_rows(5),
    );
    let outcome = pipeline::run_ingest(&env.ctx, &[file], RunMode::Full, false)
        .await
        .unwrap();

    let stored = batches::load_batch(&env.ctx.pool, outcome.batch.batch_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, BatchStatus::Completed);
    assert_eq!(stored.rows_loaded, 5);
    assert_eq!(stored.rows_promoted, 5);
    assert_eq!(stored.schema_version, env.ctx.contract.schema_version);
    assert_eq!(stored.contract_hash, env.ctx.contract.contract_hash);
    assert_eq!(stored.rules_version, env.ctx.rules.rules_version());
    assert_eq!(stored.file_fingerprints.len(), 1);
    assert!(!stored.header_fingerprint.is_empty());
    assert!(stored.contract_report.is_some());
    assert_eq!(stored.validation_passed, Some(true));
}

#[tokio::test]
async fn post_promotion_refreshes_aggregates_and_lookups() {
    let env = test_env().await;
    let file = write_csv(env.path(), "week.csv", STANDARD_HEADER, &standard_rows(10));
    pipeline::run_ingest(&env.ctx, &[file], RunMode::Full, false)
        .await
        .unwrap();

    // District 9 -> CCR, all rows in 2024-03
    let count: i64 = sqlx::query_scalar(
        "SELECT transaction_count FROM monthly_aggregates \
         WHERE region = 'CCR' AND transaction_month = '2024-03'",
    )
    .fetch_one(&env.ctx.pool)
    .await
    .unwrap();
    assert_eq!(count, 10);

    let projects: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM project_lookup")
        .fetch_one(&env.ctx.pool)
        .await
        .unwrap();
    // standard_rows cycles through 5 project names
    assert_eq!(projects, 5);
}
