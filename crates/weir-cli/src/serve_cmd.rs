use std::net::SocketAddr;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use uuid::Uuid;

use weir_core::error::EngineError;
use weir_core::lifecycle::{self, CompletionStatus, RunSubmission};
use weir_core::logs::{self, NewLogEntry};
use weir_core::{dispatch, liveness};
use weir_db::models::{RunStatus, VersionStatus};
use weir_db::queries::run_logs::{LogOrder, LogQuery};
use weir_db::queries::runs::{self as run_db, RunFilter};
use weir_db::queries::catalog as catalog_db;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

/// Engine errors that reach this function are bugs or infrastructure
/// failures, never protocol conflicts -- those are matched per endpoint.
fn engine_internal(err: EngineError) -> AppError {
    AppError::internal(anyhow::Error::new(err))
}

// ---------------------------------------------------------------------------
// Request bodies and query parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TenantCreateBody {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PipelineCreateBody {
    tenant_id: Uuid,
    name: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VersionCreateBody {
    tenant_id: Uuid,
    pipeline_id: Uuid,
    version: String,
    #[serde(default = "empty_object")]
    dag_spec: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct VersionStatusBody {
    status: String,
}

#[derive(Debug, Deserialize)]
struct RunSubmitBody {
    tenant_id: Uuid,
    pipeline_version_id: Uuid,
    #[serde(default = "empty_object")]
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ClaimBody {
    worker_id: String,
    tenant_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
struct HeartbeatBody {
    worker_id: String,
}

#[derive(Debug, Deserialize)]
struct CompleteBody {
    status: CompletionStatus,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RetryBody {
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ReapStaleBody {
    #[serde(default = "default_stale_after_seconds")]
    stale_after_seconds: i64,
    #[serde(default = "default_reap_limit")]
    limit: i64,
}

#[derive(Debug, Deserialize)]
struct LogAppendBody {
    #[serde(default = "default_log_level")]
    level: String,
    message: String,
    source: Option<String>,
    meta: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ListRunsQuery {
    tenant_id: Option<Uuid>,
    status: Option<RunStatus>,
    retry_of_run_id: Option<Uuid>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<i64>,
    /// ISO timestamp for pagination backwards.
    before_ts: Option<DateTime<Utc>>,
    /// ISO timestamp for tailing.
    after_ts: Option<DateTime<Utc>>,
    /// "asc" or "desc".
    order: Option<String>,
}

fn empty_object() -> serde_json::Value {
    json!({})
}

fn default_stale_after_seconds() -> i64 {
    300
}

fn default_reap_limit() -> i64 {
    100
}

fn default_log_level() -> String {
    "INFO".to_owned()
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(pool: PgPool) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/tenants", post(create_tenant))
        .route("/api/pipelines", post(create_pipeline))
        .route("/api/pipeline-versions", post(create_pipeline_version))
        .route(
            "/api/pipeline-versions/{id}/status",
            post(set_pipeline_version_status),
        )
        .route("/api/runs", get(list_runs).post(submit_run))
        .route("/api/runs/claim", post(claim_run))
        .route("/api/runs/reap-stale", post(reap_stale))
        .route("/api/runs/{id}", get(get_run))
        .route("/api/runs/{id}/heartbeat", post(heartbeat_run))
        .route("/api/runs/{id}/complete", post(complete_run))
        .route("/api/runs/{id}/cancel", post(cancel_run))
        .route("/api/runs/{id}/retry", post(retry_run))
        .route("/api/runs/{id}/logs", get(get_run_logs).post(append_run_log))
        .with_state(pool)
}

/// Build the CORS layer from the configured origin list. A literal `"*"`
/// anywhere in the list means any origin.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_methods(Any)
        .allow_headers(Any)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(
    pool: PgPool,
    bind: &str,
    port: u16,
    cors_origins: &[String],
) -> Result<()> {
    let app = build_router(pool).layer(cors_layer(cors_origins));
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("weir serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("weir serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

// ---------------------------------------------------------------------------
// Catalog handlers
// ---------------------------------------------------------------------------

async fn health() -> axum::response::Response {
    Json(json!({ "ok": true, "service": "weir" })).into_response()
}

async fn create_tenant(
    State(pool): State<PgPool>,
    Json(body): Json<TenantCreateBody>,
) -> Result<axum::response::Response, AppError> {
    let tenant = catalog_db::insert_tenant(&pool, &body.name)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(tenant).into_response())
}

async fn create_pipeline(
    State(pool): State<PgPool>,
    Json(body): Json<PipelineCreateBody>,
) -> Result<axum::response::Response, AppError> {
    catalog_db::get_tenant(&pool, body.tenant_id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("tenant {} not found", body.tenant_id)))?;

    let pipeline =
        catalog_db::insert_pipeline(&pool, body.tenant_id, &body.name, body.description.as_deref())
            .await
            .map_err(AppError::internal)?;
    Ok(Json(pipeline).into_response())
}

async fn create_pipeline_version(
    State(pool): State<PgPool>,
    Json(body): Json<VersionCreateBody>,
) -> Result<axum::response::Response, AppError> {
    catalog_db::get_tenant(&pool, body.tenant_id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("tenant {} not found", body.tenant_id)))?;
    catalog_db::get_pipeline(&pool, body.pipeline_id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("pipeline {} not found", body.pipeline_id)))?;

    let pv = catalog_db::insert_pipeline_version(
        &pool,
        body.tenant_id,
        body.pipeline_id,
        &body.version,
        &body.dag_spec,
    )
    .await
    .map_err(AppError::internal)?;
    Ok(Json(pv).into_response())
}

async fn set_pipeline_version_status(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
    Json(body): Json<VersionStatusBody>,
) -> Result<axum::response::Response, AppError> {
    let status: VersionStatus = body
        .status
        .parse()
        .map_err(|_| AppError::bad_request(format!("invalid status {:?}", body.status)))?;

    let pv = catalog_db::set_pipeline_version_status(&pool, id, status)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("pipeline version {id} not found")))?;
    Ok(Json(pv).into_response())
}

async fn submit_run(
    State(pool): State<PgPool>,
    Json(body): Json<RunSubmitBody>,
) -> Result<axum::response::Response, AppError> {
    let run = lifecycle::submit(
        &pool,
        RunSubmission {
            tenant_id: body.tenant_id,
            pipeline_version_id: body.pipeline_version_id,
            parameters: body.parameters,
        },
    )
    .await
    .map_err(|e| match e {
        EngineError::VersionNotFound => AppError::not_found("pipeline version not found"),
        EngineError::VersionNotApproved => {
            AppError::bad_request("pipeline version must be APPROVED to run")
        }
        other => engine_internal(other),
    })?;
    Ok(Json(run).into_response())
}

// ---------------------------------------------------------------------------
// Run protocol handlers
// ---------------------------------------------------------------------------

async fn claim_run(
    State(pool): State<PgPool>,
    Json(body): Json<ClaimBody>,
) -> axum::response::Response {
    match dispatch::claim(&pool, &body.worker_id, body.tenant_id).await {
        Ok(None) => Json(json!({ "claimed": false })).into_response(),
        Ok(Some(claimed)) => Json(json!({
            "claimed": true,
            "run": claimed.run,
            "pipeline_version": claimed.pipeline_version,
        }))
        .into_response(),
        Err(EngineError::VersionVanished { .. }) => (
            StatusCode::CONFLICT,
            Json(json!({
                "ok": false,
                "reason": "pipeline_version_not_found_for_claimed_run",
            })),
        )
            .into_response(),
        Err(e) => engine_internal(e).into_response(),
    }
}

async fn get_run(State(pool): State<PgPool>, Path(id): Path<Uuid>) -> axum::response::Response {
    match run_db::get_run(&pool, id).await {
        Ok(Some(run)) => Json(json!({ "found": true, "run": run })).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "found": false, "reason": "run_not_found" })),
        )
            .into_response(),
        Err(e) => AppError::internal(e).into_response(),
    }
}

async fn list_runs(
    State(pool): State<PgPool>,
    Query(query): Query<ListRunsQuery>,
) -> Result<axum::response::Response, AppError> {
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let offset = query.offset.unwrap_or(0).max(0);

    let filter = RunFilter {
        tenant_id: query.tenant_id,
        status: query.status,
        retry_of_run_id: query.retry_of_run_id,
    };
    let items = run_db::list_runs(&pool, &filter, limit, offset)
        .await
        .map_err(AppError::internal)?;
    let count = items.len();

    Ok(Json(json!({
        "items": items,
        "limit": limit,
        "offset": offset,
        "count": count,
    }))
    .into_response())
}

async fn heartbeat_run(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
    Json(body): Json<HeartbeatBody>,
) -> axum::response::Response {
    match liveness::heartbeat(&pool, id, &body.worker_id).await {
        Ok(ts) => Json(json!({ "ok": true, "heartbeat_at": ts })).into_response(),
        Err(EngineError::RunNotFound) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "ok": false, "reason": "run_not_found" })),
        )
            .into_response(),
        Err(EngineError::InvalidState { status }) => (
            StatusCode::CONFLICT,
            Json(json!({ "ok": false, "reason": "not_running", "status": status })),
        )
            .into_response(),
        Err(EngineError::WorkerMismatch { claimed_by }) => (
            StatusCode::CONFLICT,
            Json(json!({ "ok": false, "reason": "worker_mismatch", "claimed_by": claimed_by })),
        )
            .into_response(),
        Err(e) => engine_internal(e).into_response(),
    }
}

async fn complete_run(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
    Json(body): Json<CompleteBody>,
) -> axum::response::Response {
    match lifecycle::complete(&pool, id, body.status, body.error_message.as_deref()).await {
        Ok(run) => Json(json!({ "ok": true, "run": run })).into_response(),
        Err(EngineError::RunNotFound) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "ok": false, "reason": "run_not_found" })),
        )
            .into_response(),
        Err(EngineError::InvalidState { status }) => (
            StatusCode::CONFLICT,
            Json(json!({ "ok": false, "reason": "invalid_state", "status": status })),
        )
            .into_response(),
        Err(e) => engine_internal(e).into_response(),
    }
}

async fn cancel_run(State(pool): State<PgPool>, Path(id): Path<Uuid>) -> axum::response::Response {
    match lifecycle::cancel(&pool, id).await {
        Ok(run) => Json(json!({ "ok": true, "run": run })).into_response(),
        Err(EngineError::RunNotFound) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "ok": false, "reason": "run_not_found" })),
        )
            .into_response(),
        Err(EngineError::InvalidState { status }) => (
            StatusCode::CONFLICT,
            Json(json!({ "ok": false, "reason": "invalid_state", "status": status })),
        )
            .into_response(),
        Err(e) => engine_internal(e).into_response(),
    }
}

async fn retry_run(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
    body: axum::body::Bytes,
) -> axum::response::Response {
    // The body is optional; an empty body means "reuse the parent's parameters".
    let parameters_override = if body.is_empty() {
        None
    } else {
        match serde_json::from_slice::<RetryBody>(&body) {
            Ok(parsed) => parsed.parameters,
            Err(_) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "ok": false, "reason": "invalid_body" })),
                )
                    .into_response();
            }
        }
    };

    match lifecycle::retry(&pool, id, parameters_override).await {
        Ok(outcome) => Json(json!({
            "ok": true,
            "run": outcome.run,
            "retry_of": outcome.retry_of,
        }))
        .into_response(),
        Err(EngineError::RunNotFound) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "ok": false, "reason": "run_not_found" })),
        )
            .into_response(),
        Err(EngineError::InvalidState { status }) => (
            StatusCode::CONFLICT,
            Json(json!({ "ok": false, "reason": "invalid_state", "status": status })),
        )
            .into_response(),
        Err(EngineError::VersionNotFound) => (
            StatusCode::CONFLICT,
            Json(json!({ "ok": false, "reason": "pipeline_version_not_found" })),
        )
            .into_response(),
        Err(EngineError::VersionNotApproved) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "ok": false, "reason": "pipeline_version_not_approved" })),
        )
            .into_response(),
        Err(e) => engine_internal(e).into_response(),
    }
}

async fn reap_stale(
    State(pool): State<PgPool>,
    Json(body): Json<ReapStaleBody>,
) -> axum::response::Response {
    match liveness::reap_stale(&pool, body.stale_after_seconds, body.limit).await {
        Ok(report) => Json(json!({
            "ok": true,
            "reaped": report.reaped(),
            "run_ids": report.run_ids,
        }))
        .into_response(),
        Err(e) => engine_internal(e).into_response(),
    }
}

// ---------------------------------------------------------------------------
// Log stream handlers
// ---------------------------------------------------------------------------

async fn append_run_log(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
    Json(body): Json<LogAppendBody>,
) -> axum::response::Response {
    let entry = NewLogEntry {
        level: body.level,
        message: body.message,
        source: body.source,
        meta: body.meta,
    };
    match logs::append(&pool, id, entry).await {
        Ok(log) => Json(json!({ "ok": true, "log": log })).into_response(),
        Err(EngineError::RunNotFound) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "found": false, "reason": "run_not_found" })),
        )
            .into_response(),
        Err(e) => engine_internal(e).into_response(),
    }
}

async fn get_run_logs(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
    Query(query): Query<LogsQuery>,
) -> axum::response::Response {
    let order = match query.order.as_deref() {
        Some(o) if o.eq_ignore_ascii_case("desc") => LogOrder::Desc,
        _ => LogOrder::Asc,
    };
    let log_query = LogQuery {
        limit: query.limit.unwrap_or(logs::DEFAULT_QUERY_LIMIT),
        before_ts: query.before_ts,
        after_ts: query.after_ts,
        order,
    };
    match logs::query(&pool, id, log_query).await {
        Ok(entries) => {
            Json(json!({ "found": true, "run_id": id, "logs": entries })).into_response()
        }
        Err(EngineError::RunNotFound) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "found": false, "run_id": id, "logs": [] })),
        )
            .into_response(),
        Err(e) => engine_internal(e).into_response(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
