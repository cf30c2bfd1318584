//! Integration tests for the dispatcher's atomic claim.
//!
//! Each test creates a unique temporary database via `weir-test-utils`,
//! runs migrations, and drops it on completion so tests are fully isolated.

use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use weir_core::dispatch;
use weir_core::lifecycle::{self, RunSubmission};
use weir_db::models::{PipelineRun, RunStatus, VersionStatus};
use weir_db::queries::catalog;
use weir_db::queries::runs;
use weir_test_utils::{create_test_db, drop_test_db};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Insert a tenant, pipeline, and APPROVED version; return (tenant_id, version_id).
async fn seed_approved_version(pool: &PgPool, tenant_name: &str) -> (Uuid, Uuid) {
    let tenant = catalog::insert_tenant(pool, tenant_name).await.unwrap();
    let pipeline = catalog::insert_pipeline(pool, tenant.id, "ingest", None)
        .await
        .unwrap();
    let pv = catalog::insert_pipeline_version(
        pool,
        tenant.id,
        pipeline.id,
        "v1",
        &json!({"nodes": ["extract", "load"]}),
    )
    .await
    .unwrap();
    catalog::set_pipeline_version_status(pool, pv.id, VersionStatus::Approved)
        .await
        .unwrap();
    (tenant.id, pv.id)
}

async fn seed_queued_run(pool: &PgPool, tenant_id: Uuid, version_id: Uuid) -> PipelineRun {
    lifecycle::submit(
        pool,
        RunSubmission {
            tenant_id,
            pipeline_version_id: version_id,
            parameters: json!({}),
        },
    )
    .await
    .expect("submit should succeed")
}

/// Shift a run's creation time into the past so ordering is deterministic.
async fn age_run(pool: &PgPool, run_id: Uuid, seconds: i64) {
    sqlx::query(
        "UPDATE pipeline_runs SET created_at = NOW() - $2::bigint * INTERVAL '1 second' \
         WHERE id = $1",
    )
    .bind(run_id)
    .bind(seconds)
    .execute(pool)
    .await
    .unwrap();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn claim_on_empty_queue_returns_none() {
    let (pool, db_name) = create_test_db().await;

    let outcome = dispatch::claim(&pool, "w1", None).await.unwrap();
    assert!(outcome.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn claim_transitions_and_binds_worker() {
    let (pool, db_name) = create_test_db().await;
    let (tenant_id, version_id) = seed_approved_version(&pool, "acme").await;
    let queued = seed_queued_run(&pool, tenant_id, version_id).await;

    let claimed = dispatch::claim(&pool, "w1", None)
        .await
        .unwrap()
        .expect("a run should be claimed");

    let run = &claimed.run;
    assert_eq!(run.id, queued.id);
    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.claimed_by.as_deref(), Some("w1"));
    assert!(run.claimed_at.is_some());
    assert!(run.heartbeat_at.is_some());
    assert!(run.started_at.is_some());
    assert!(run.finished_at.is_none());

    // The worker gets the version snapshot it needs to execute.
    assert_eq!(claimed.pipeline_version.id, version_id);
    assert_eq!(claimed.pipeline_version.status, VersionStatus::Approved);
    assert_eq!(claimed.pipeline_version.dag_spec["nodes"][0], "extract");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn claim_drains_queue_then_returns_none() {
    let (pool, db_name) = create_test_db().await;
    let (tenant_id, version_id) = seed_approved_version(&pool, "acme").await;
    seed_queued_run(&pool, tenant_id, version_id).await;
    seed_queued_run(&pool, tenant_id, version_id).await;

    let first = dispatch::claim(&pool, "w1", None).await.unwrap();
    let second = dispatch::claim(&pool, "w2", None).await.unwrap();
    let third = dispatch::claim(&pool, "w3", None).await.unwrap();

    let first = first.expect("first claim should succeed");
    let second = second.expect("second claim should succeed");
    assert_ne!(first.run.id, second.run.id);
    assert!(third.is_none(), "queue should be drained");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn claim_prefers_oldest_run() {
    let (pool, db_name) = create_test_db().await;
    let (tenant_id, version_id) = seed_approved_version(&pool, "acme").await;

    let newer = seed_queued_run(&pool, tenant_id, version_id).await;
    let older = seed_queued_run(&pool, tenant_id, version_id).await;
    age_run(&pool, older.id, 60).await;

    let claimed = dispatch::claim(&pool, "w1", None)
        .await
        .unwrap()
        .expect("claim should succeed");
    assert_eq!(claimed.run.id, older.id, "oldest run should dispatch first");

    let claimed = dispatch::claim(&pool, "w1", None)
        .await
        .unwrap()
        .expect("claim should succeed");
    assert_eq!(claimed.run.id, newer.id);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn concurrent_claims_get_distinct_runs() {
    let (pool, db_name) = create_test_db().await;
    let (tenant_id, version_id) = seed_approved_version(&pool, "acme").await;

    // K = 2 queued runs, N = 3 concurrent claimers: exactly min(N, K) = 2
    // succeed and they get distinct runs.
    let r1 = seed_queued_run(&pool, tenant_id, version_id).await;
    age_run(&pool, r1.id, 10).await;
    seed_queued_run(&pool, tenant_id, version_id).await;

    let mut handles = Vec::new();
    for worker in ["w1", "w2", "w3"] {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            dispatch::claim(&pool, worker, None).await
        }));
    }

    let mut claimed_ids = Vec::new();
    let mut empties = 0;
    for handle in handles {
        match handle.await.unwrap().expect("claim should not error") {
            Some(claimed) => claimed_ids.push(claimed.run.id),
            None => empties += 1,
        }
    }

    assert_eq!(claimed_ids.len(), 2, "exactly two claims should land");
    assert_eq!(empties, 1, "the third claimer should see an empty queue");
    assert_ne!(claimed_ids[0], claimed_ids[1], "claims must be disjoint");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn claim_respects_tenant_filter() {
    let (pool, db_name) = create_test_db().await;
    let (tenant_a, version_a) = seed_approved_version(&pool, "acme").await;
    let (tenant_b, version_b) = seed_approved_version(&pool, "globex").await;

    let run_a = seed_queued_run(&pool, tenant_a, version_a).await;
    let run_b = seed_queued_run(&pool, tenant_b, version_b).await;

    let claimed = dispatch::claim(&pool, "w1", Some(tenant_b))
        .await
        .unwrap()
        .expect("tenant-filtered claim should succeed");
    assert_eq!(claimed.run.id, run_b.id);
    assert_eq!(claimed.run.tenant_id, tenant_b);

    // Tenant A's run is untouched and still claimable.
    let still_queued = runs::get_run(&pool, run_a.id).await.unwrap().unwrap();
    assert_eq!(still_queued.status, RunStatus::Queued);

    // A filter on a tenant with no queued work claims nothing.
    let empty = dispatch::claim(&pool, "w1", Some(tenant_b)).await.unwrap();
    assert!(empty.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn claimed_run_is_not_reclaimable() {
    let (pool, db_name) = create_test_db().await;
    let (tenant_id, version_id) = seed_approved_version(&pool, "acme").await;
    let run = seed_queued_run(&pool, tenant_id, version_id).await;

    dispatch::claim(&pool, "w1", None)
        .await
        .unwrap()
        .expect("first claim should succeed");

    let second = dispatch::claim(&pool, "w2", None).await.unwrap();
    assert!(second.is_none(), "a RUNNING run must not be re-dispatched");

    let current = runs::get_run(&pool, run.id).await.unwrap().unwrap();
    assert_eq!(current.claimed_by.as_deref(), Some("w1"));

    pool.close().await;
    drop_test_db(&db_name).await;
}
