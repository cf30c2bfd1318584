//! Database query functions for the catalog tables: `tenants`,
//! `pipelines`, and `pipeline_versions`.

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::models::{Pipeline, PipelineVersion, PipelineVersionSnapshot, Tenant, VersionStatus};

/// Insert a new tenant row. Returns the inserted tenant with
/// server-generated defaults (id, created_at).
pub async fn insert_tenant(pool: &PgPool, name: &str) -> Result<Tenant> {
    let tenant =
        sqlx::query_as::<_, Tenant>("INSERT INTO tenants (name) VALUES ($1) RETURNING *")
            .bind(name)
            .fetch_one(pool)
            .await
            .context("failed to insert tenant")?;

    Ok(tenant)
}

/// Fetch a single tenant by ID.
pub async fn get_tenant(pool: &PgPool, id: Uuid) -> Result<Option<Tenant>> {
    let tenant = sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch tenant")?;

    Ok(tenant)
}

/// Insert a new pipeline row for a tenant.
pub async fn insert_pipeline(
    pool: &PgPool,
    tenant_id: Uuid,
    name: &str,
    description: Option<&str>,
) -> Result<Pipeline> {
    let pipeline = sqlx::query_as::<_, Pipeline>(
        "INSERT INTO pipelines (tenant_id, name, description) \
         VALUES ($1, $2, $3) \
         RETURNING *",
    )
    .bind(tenant_id)
    .bind(name)
    .bind(description)
    .fetch_one(pool)
    .await
    .context("failed to insert pipeline")?;

    Ok(pipeline)
}

/// Fetch a single pipeline by ID.
pub async fn get_pipeline(pool: &PgPool, id: Uuid) -> Result<Option<Pipeline>> {
    let pipeline = sqlx::query_as::<_, Pipeline>("SELECT * FROM pipelines WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch pipeline")?;

    Ok(pipeline)
}

/// Insert a new pipeline version. Versions are born DRAFT; an explicit
/// status change is required before any run may reference them.
pub async fn insert_pipeline_version(
    pool: &PgPool,
    tenant_id: Uuid,
    pipeline_id: Uuid,
    version: &str,
    dag_spec: &serde_json::Value,
) -> Result<PipelineVersion> {
    let pv = sqlx::query_as::<_, PipelineVersion>(
        "INSERT INTO pipeline_versions (tenant_id, pipeline_id, version, dag_spec) \
         VALUES ($1, $2, $3, $4) \
         RETURNING *",
    )
    .bind(tenant_id)
    .bind(pipeline_id)
    .bind(version)
    .bind(dag_spec)
    .fetch_one(pool)
    .await
    .context("failed to insert pipeline version")?;

    Ok(pv)
}

/// Fetch a single pipeline version by ID.
pub async fn get_pipeline_version(pool: &PgPool, id: Uuid) -> Result<Option<PipelineVersion>> {
    let pv =
        sqlx::query_as::<_, PipelineVersion>("SELECT * FROM pipeline_versions WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("failed to fetch pipeline version")?;

    Ok(pv)
}

/// Set the status of a pipeline version (DRAFT / APPROVED / DEPRECATED).
///
/// Returns the updated row, or `None` if the version does not exist.
pub async fn set_pipeline_version_status(
    pool: &PgPool,
    id: Uuid,
    status: VersionStatus,
) -> Result<Option<PipelineVersion>> {
    let pv = sqlx::query_as::<_, PipelineVersion>(
        "UPDATE pipeline_versions SET status = $1 WHERE id = $2 RETURNING *",
    )
    .bind(status)
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("failed to set pipeline version status")?;

    Ok(pv)
}

/// Fetch the claim-time snapshot of a pipeline version (id, status,
/// dag_spec). Runs inside the dispatcher's claim transaction.
pub async fn get_version_snapshot(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<Option<PipelineVersionSnapshot>> {
    let snapshot = sqlx::query_as::<_, PipelineVersionSnapshot>(
        "SELECT id, status, dag_spec FROM pipeline_versions WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
    .context("failed to fetch pipeline version snapshot")?;

    Ok(snapshot)
}
