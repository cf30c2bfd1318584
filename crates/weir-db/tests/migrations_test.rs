//! Schema-shape tests: the migrations must produce the tables, columns,
//! and indexes the rest of the system depends on.

use weir_test_utils::{create_test_db, drop_test_db};

#[tokio::test]
async fn migrations_create_expected_tables() {
    let (pool, db_name) = create_test_db().await;

    let tables: Vec<(String,)> = sqlx::query_as(
        "SELECT tablename::text FROM pg_tables \
         WHERE schemaname = 'public' \
         ORDER BY tablename",
    )
    .fetch_all(&pool)
    .await
    .expect("should list tables");

    let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
    for expected in [
        "pipeline_run_logs",
        "pipeline_runs",
        "pipeline_versions",
        "pipelines",
        "tenants",
    ] {
        assert!(
            names.contains(&expected),
            "missing table {expected}, got: {names:?}"
        );
    }

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn pipeline_runs_has_full_column_set() {
    let (pool, db_name) = create_test_db().await;

    let columns: Vec<(String,)> = sqlx::query_as(
        "SELECT column_name::text FROM information_schema.columns \
         WHERE table_schema = 'public' AND table_name = 'pipeline_runs'",
    )
    .fetch_all(&pool)
    .await
    .expect("should list columns");

    let names: Vec<&str> = columns.iter().map(|(n,)| n.as_str()).collect();
    for expected in [
        "id",
        "tenant_id",
        "pipeline_version_id",
        "status",
        "trigger_type",
        "parameters",
        "claimed_at",
        "claimed_by",
        "heartbeat_at",
        "started_at",
        "finished_at",
        "error_message",
        "retry_of_run_id",
        "root_run_id",
        "created_at",
        "updated_at",
    ] {
        assert!(
            names.contains(&expected),
            "missing column {expected}, got: {names:?}"
        );
    }

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn hot_path_indexes_exist() {
    let (pool, db_name) = create_test_db().await;

    let indexes: Vec<(String,)> = sqlx::query_as(
        "SELECT indexname::text FROM pg_indexes \
         WHERE schemaname = 'public'",
    )
    .fetch_all(&pool)
    .await
    .expect("should list indexes");

    let names: Vec<&str> = indexes.iter().map(|(n,)| n.as_str()).collect();
    for expected in [
        "idx_pipeline_runs_status_created",
        "idx_pipeline_runs_tenant_created",
        "idx_pipeline_run_logs_run_ts",
        "idx_pipeline_run_logs_tenant_ts",
    ] {
        assert!(
            names.contains(&expected),
            "missing index {expected}, got: {names:?}"
        );
    }

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let (pool, db_name) = create_test_db().await;

    // create_test_db already ran them once; a second run is a no-op.
    weir_db::pool::apply_migrations(&pool, weir_db::pool::default_migrations_path())
        .await
        .expect("re-applying migrations should succeed");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn status_check_constraint_rejects_garbage() {
    let (pool, db_name) = create_test_db().await;

    let tenant = weir_db::queries::catalog::insert_tenant(&pool, "t").await.unwrap();
    let pipeline =
        weir_db::queries::catalog::insert_pipeline(&pool, tenant.id, "p", None).await.unwrap();
    let pv = weir_db::queries::catalog::insert_pipeline_version(
        &pool,
        tenant.id,
        pipeline.id,
        "v1",
        &serde_json::json!({}),
    )
    .await
    .unwrap();

    let result = sqlx::query(
        "INSERT INTO pipeline_runs (tenant_id, pipeline_version_id, status) \
         VALUES ($1, $2, 'EXPLODED')",
    )
    .bind(tenant.id)
    .bind(pv.id)
    .execute(&pool)
    .await;

    assert!(result.is_err(), "bogus status should violate the CHECK");

    pool.close().await;
    drop_test_db(&db_name).await;
}
