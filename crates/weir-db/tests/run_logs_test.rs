//! Integration tests for the `pipeline_run_logs` query functions.

use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use weir_db::models::{PipelineRun, TriggerType};
use weir_db::queries::catalog;
use weir_db::queries::run_logs::{self, LogOrder, LogQuery, NewRunLog};
use weir_db::queries::runs::{self, NewRun};
use weir_test_utils::{create_test_db, drop_test_db};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

async fn seed_run(pool: &PgPool) -> PipelineRun {
    let tenant = catalog::insert_tenant(pool, "acme").await.unwrap();
    let pipeline = catalog::insert_pipeline(pool, tenant.id, "ingest", None)
        .await
        .unwrap();
    let pv = catalog::insert_pipeline_version(pool, tenant.id, pipeline.id, "v1", &json!({}))
        .await
        .unwrap();

    let mut conn = pool.acquire().await.unwrap();
    runs::insert_run(
        &mut conn,
        &NewRun {
            tenant_id: tenant.id,
            pipeline_version_id: pv.id,
            trigger_type: TriggerType::Manual,
            parameters: json!({}),
            retry_of_run_id: None,
            root_run_id: None,
        },
    )
    .await
    .unwrap()
}

async fn append(pool: &PgPool, run: &PipelineRun, message: &str, meta: Option<serde_json::Value>) {
    let mut conn = pool.acquire().await.unwrap();
    run_logs::insert_log(
        &mut conn,
        &NewRunLog {
            run_id: run.id,
            tenant_id: run.tenant_id,
            level: "INFO".to_owned(),
            message: message.to_owned(),
            source: Some("worker".to_owned()),
            meta,
        },
    )
    .await
    .expect("insert_log should succeed");
    // Keep timestamps strictly increasing for the range tests.
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn insert_log_gets_server_defaults() {
    let (pool, db_name) = create_test_db().await;
    let run = seed_run(&pool).await;

    let mut conn = pool.acquire().await.unwrap();
    let entry = run_logs::insert_log(
        &mut conn,
        &NewRunLog {
            run_id: run.id,
            tenant_id: run.tenant_id,
            level: "WARN".to_owned(),
            message: "something odd".to_owned(),
            source: None,
            meta: None,
        },
    )
    .await
    .unwrap();
    drop(conn);

    assert_eq!(entry.run_id, run.id);
    assert_eq!(entry.tenant_id, run.tenant_id);
    assert_eq!(entry.level, "WARN");
    assert!(entry.source.is_none());
    assert!(entry.meta.is_none());
    assert_ne!(entry.id, Uuid::nil());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn list_logs_orders_both_directions() {
    let (pool, db_name) = create_test_db().await;
    let run = seed_run(&pool).await;

    append(&pool, &run, "first", None).await;
    append(&pool, &run, "second", None).await;
    append(&pool, &run, "third", None).await;

    let asc = run_logs::list_logs(
        &pool,
        run.id,
        &LogQuery {
            limit: 10,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let messages: Vec<&str> = asc.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["first", "second", "third"]);

    let desc = run_logs::list_logs(
        &pool,
        run.id,
        &LogQuery {
            limit: 2,
            order: LogOrder::Desc,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let messages: Vec<&str> = desc.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["third", "second"]);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn list_logs_bounds_are_strict() {
    let (pool, db_name) = create_test_db().await;
    let run = seed_run(&pool).await;

    append(&pool, &run, "first", None).await;
    append(&pool, &run, "second", None).await;
    append(&pool, &run, "third", None).await;

    let all = run_logs::list_logs(
        &pool,
        run.id,
        &LogQuery {
            limit: 10,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let middle_ts = all[1].ts;

    // Strictly after the middle entry: only the third.
    let after = run_logs::list_logs(
        &pool,
        run.id,
        &LogQuery {
            limit: 10,
            after_ts: Some(middle_ts),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].message, "third");

    // Strictly before: only the first.
    let before = run_logs::list_logs(
        &pool,
        run.id,
        &LogQuery {
            limit: 10,
            before_ts: Some(middle_ts),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].message, "first");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn meta_json_round_trips() {
    let (pool, db_name) = create_test_db().await;
    let run = seed_run(&pool).await;

    let meta = json!({"step": "extract", "rows": 1234, "nested": {"ok": true}});
    append(&pool, &run, "with meta", Some(meta.clone())).await;

    let entries = run_logs::list_logs(
        &pool,
        run.id,
        &LogQuery {
            limit: 10,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].meta, Some(meta));

    assert_eq!(run_logs::count_logs(&pool, run.id).await.unwrap(), 1);

    pool.close().await;
    drop_test_db(&db_name).await;
}
