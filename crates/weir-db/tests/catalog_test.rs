//! Integration tests for the catalog query functions.

use serde_json::json;
use uuid::Uuid;

use weir_db::models::VersionStatus;
use weir_db::queries::catalog;
use weir_test_utils::{create_test_db, drop_test_db};

#[tokio::test]
async fn tenant_crud_roundtrip() {
    let (pool, db_name) = create_test_db().await;

    let tenant = catalog::insert_tenant(&pool, "acme").await.unwrap();
    assert_eq!(tenant.name, "acme");

    let fetched = catalog::get_tenant(&pool, tenant.id).await.unwrap();
    assert_eq!(fetched.expect("tenant should exist").id, tenant.id);

    let missing = catalog::get_tenant(&pool, Uuid::new_v4()).await.unwrap();
    assert!(missing.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn pipeline_version_starts_draft_and_transitions() {
    let (pool, db_name) = create_test_db().await;

    let tenant = catalog::insert_tenant(&pool, "acme").await.unwrap();
    let pipeline = catalog::insert_pipeline(&pool, tenant.id, "ingest", Some("nightly load"))
        .await
        .unwrap();
    assert_eq!(pipeline.description.as_deref(), Some("nightly load"));

    let pv = catalog::insert_pipeline_version(
        &pool,
        tenant.id,
        pipeline.id,
        "v1",
        &json!({"nodes": ["a", "b"]}),
    )
    .await
    .unwrap();
    assert_eq!(pv.status, VersionStatus::Draft);
    assert_eq!(pv.dag_spec["nodes"][0], "a");

    let approved = catalog::set_pipeline_version_status(&pool, pv.id, VersionStatus::Approved)
        .await
        .unwrap()
        .expect("version should exist");
    assert_eq!(approved.status, VersionStatus::Approved);

    let gone = catalog::set_pipeline_version_status(&pool, Uuid::new_v4(), VersionStatus::Approved)
        .await
        .unwrap();
    assert!(gone.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn version_snapshot_carries_dag_spec() {
    let (pool, db_name) = create_test_db().await;

    let tenant = catalog::insert_tenant(&pool, "acme").await.unwrap();
    let pipeline = catalog::insert_pipeline(&pool, tenant.id, "ingest", None)
        .await
        .unwrap();
    let pv = catalog::insert_pipeline_version(
        &pool,
        tenant.id,
        pipeline.id,
        "v2",
        &json!({"nodes": ["extract"]}),
    )
    .await
    .unwrap();

    let mut conn = pool.acquire().await.unwrap();
    let snapshot = catalog::get_version_snapshot(&mut conn, pv.id)
        .await
        .unwrap()
        .expect("snapshot should exist");
    assert_eq!(snapshot.id, pv.id);
    assert_eq!(snapshot.status, VersionStatus::Draft);
    assert_eq!(snapshot.dag_spec, json!({"nodes": ["extract"]}));

    let missing = catalog::get_version_snapshot(&mut conn, Uuid::new_v4())
        .await
        .unwrap();
    assert!(missing.is_none());
    drop(conn);

    pool.close().await;
    drop_test_db(&db_name).await;
}
