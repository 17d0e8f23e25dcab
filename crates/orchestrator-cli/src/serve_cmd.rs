//! `orchestrator serve`: a thin HTTP adapter over the task queue, hosted in
//! the same process as the worker loop so both share one `ClaudeRunner`.
//!
//! Every handler here does nothing but validate the request, call into
//! [`orchestrator_core::queue::TaskQueue`], and shape the response. All
//! business logic (state transitions, retry scheduling, logging) lives in
//! the queue itself.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use orchestrator_core::queue::{EnqueueRequest, TaskQueue};
use orchestrator_core::runner::ClaudeRunner;
use orchestrator_core::worker::Worker;
use orchestrator_db::models::{Task, TaskLog, TaskStatus, TaskType};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn not_found(task_id: Uuid) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "task_not_found",
            message: format!("Task {task_id} not found"),
        }
    }

    fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            code: "task_already_completed",
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "invalid_request",
            message: message.into(),
        }
    }

    fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal_error",
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message, "code": self.code });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DeliveryPayload {
    pub email: Option<String>,
    pub storage: Option<String>,
    pub folder: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TaskCreateRequest {
    pub r#type: String,
    pub title: String,
    pub description: Option<String>,
    pub config: Option<serde_json::Value>,
    pub delivery: Option<DeliveryPayload>,
    pub attachments: Option<Vec<String>>,
    pub max_attempts: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub id: Uuid,
    pub r#type: TaskType,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub queued_at: Option<chrono::DateTime<chrono::Utc>>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_error: Option<String>,
}

impl From<&Task> for TaskResponse {
    fn from(t: &Task) -> Self {
        Self {
            id: t.id,
            r#type: t.r#type,
            title: t.title.clone(),
            description: t.description.clone(),
            status: t.status,
            attempts: t.attempts,
            max_attempts: t.max_attempts,
            created_at: t.created_at,
            queued_at: t.queued_at,
            started_at: t.started_at,
            completed_at: t.completed_at,
            last_error: t.last_error.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskResponse>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    20
}

#[derive(Debug, Serialize)]
pub struct TaskLogResponse {
    pub id: i64,
    pub level: orchestrator_db::models::LogLevel,
    pub event: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub correlation_id: Option<String>,
}

impl From<&TaskLog> for TaskLogResponse {
    fn from(l: &TaskLog) -> Self {
        Self {
            id: l.id,
            level: l.level,
            event: l.event.clone(),
            message: l.message.clone(),
            data: l.data.clone(),
            timestamp: l.timestamp,
            correlation_id: l.correlation_id.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ResultQuery {
    #[serde(default)]
    pub include_logs: bool,
}

#[derive(Debug, Serialize)]
pub struct TaskResultResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub summary: Option<String>,
    pub outputs_path: Option<String>,
    pub cloud_links: Option<serde_json::Value>,
    pub logs: Option<Vec<TaskLogResponse>>,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_log_limit")]
    pub limit: i64,
}

fn default_log_limit() -> i64 {
    100
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct AppState {
    queue: Arc<TaskQueue>,
    runner: ClaudeRunner,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(queue: Arc<TaskQueue>, runner: ClaudeRunner) -> Router {
    let state = AppState { queue, runner };
    Router::new()
        .route("/api/v1/health", get(health_check))
        .route("/api/v1/tasks", post(create_task).get(list_tasks))
        .route(
            "/api/v1/tasks/{id}",
            get(get_task).delete(cancel_task),
        )
        .route("/api/v1/tasks/{id}/result", get(get_task_result))
        .route("/api/v1/tasks/{id}/logs", get(get_task_logs))
        .route("/api/v1/stats", get(get_stats))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the HTTP API and drive the worker loop in the same process, sharing
/// one `ClaudeRunner`. This is what makes `DELETE /api/v1/tasks/{id}` able to
/// actually signal a live child: the worker that spawned it and the handler
/// that cancels it hold the same active-process registry, not two separate
/// ones in two separate processes.
pub async fn run_serve(
    queue: Arc<TaskQueue>,
    runner: ClaudeRunner,
    worker: Arc<Worker>,
    bind: &str,
    port: u16,
) -> Result<()> {
    let app = build_router(queue, runner);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;

    let worker_for_loop = Arc::clone(&worker);
    let worker_task = tokio::spawn(async move { worker_for_loop.run().await });

    tracing::info!("serving HTTP API on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&worker)))
        .await?;
    tracing::info!("HTTP API shut down");

    let _ = worker_task.await;
    Ok(())
}

async fn shutdown_signal(worker: Arc<Worker>) {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    tracing::info!("shutdown requested, stopping worker");
    worker.stop().await;
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn create_task(
    State(state): State<AppState>,
    Json(body): Json<TaskCreateRequest>,
) -> Result<(StatusCode, Json<TaskResponse>), AppError> {
    let task_type: TaskType = body
        .r#type
        .parse()
        .map_err(|_| AppError::bad_request(format!("invalid task type: {:?}", body.r#type)))?;

    let delivery = body
        .delivery
        .map(|d| -> Result<serde_json::Value, AppError> {
            let storage = d
                .storage
                .map(|s| {
                    s.parse::<orchestrator_db::models::StorageProvider>()
                        .map_err(|_| AppError::bad_request(format!("invalid storage provider: {s:?}")))
                })
                .transpose()?;
            Ok(serde_json::json!({
                "email": d.email,
                "storage": storage,
                "folder": d.folder,
            }))
        })
        .transpose()?;

    let correlation_id = Uuid::new_v4().to_string();

    let task = state
        .queue
        .enqueue(EnqueueRequest {
            r#type: task_type,
            title: body.title,
            description: body.description,
            config: body.config,
            delivery,
            attachment_refs: body.attachments.map(|a| serde_json::json!(a)),
            max_attempts: body.max_attempts.unwrap_or(3),
            correlation_id: Some(correlation_id),
        })
        .await
        .map_err(AppError::internal)?;

    Ok((StatusCode::CREATED, Json(TaskResponse::from(&task))))
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<TaskListResponse>, AppError> {
    let status = q
        .status
        .map(|s| {
            s.parse::<TaskStatus>()
                .map_err(|_| AppError::bad_request(format!("invalid status: {s:?}")))
        })
        .transpose()?;

    let page = q.page.max(1);
    let page_size = q.page_size.clamp(1, 100);
    let offset = (page - 1) * page_size;

    let (tasks, total) = state
        .queue
        .list(status, page_size, offset)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(TaskListResponse {
        tasks: tasks.iter().map(TaskResponse::from).collect(),
        total,
        page,
        page_size,
    }))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskResponse>, AppError> {
    let task = state.queue.get(id).await.map_err(AppError::internal)?;
    let task = task.ok_or(AppError::not_found(id))?;
    Ok(Json(TaskResponse::from(&task)))
}

async fn get_task_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<ResultQuery>,
) -> Result<Json<TaskResultResponse>, AppError> {
    let task = state.queue.get(id).await.map_err(AppError::internal)?;
    let task = task.ok_or(AppError::not_found(id))?;

    let logs = if q.include_logs {
        let entries = state.queue.logs(id, 500).await.map_err(AppError::internal)?;
        Some(entries.iter().map(TaskLogResponse::from).collect())
    } else {
        None
    };

    Ok(Json(TaskResultResponse {
        task_id: task.id,
        status: task.status,
        summary: task.result_summary,
        outputs_path: task.outputs_path,
        cloud_links: task.cloud_links,
        logs,
    }))
}

async fn get_task_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<LogsQuery>,
) -> Result<Json<Vec<TaskLogResponse>>, AppError> {
    state.queue.get(id).await.map_err(AppError::internal)?.ok_or(AppError::not_found(id))?;

    let limit = q.limit.clamp(1, 500);
    let logs = state.queue.logs(id, limit).await.map_err(AppError::internal)?;
    Ok(Json(logs.iter().map(TaskLogResponse::from).collect()))
}

async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let task = state.queue.get(id).await.map_err(AppError::internal)?;
    let task = task.ok_or(AppError::not_found(id))?;

    if matches!(
        task.status,
        TaskStatus::Completed | TaskStatus::Dead | TaskStatus::Failed
    ) {
        return Err(AppError::conflict("Cannot cancel completed task"));
    }

    let cancelled = state.queue.cancel(id).await.map_err(AppError::internal)?;
    if !cancelled {
        return Err(AppError::conflict("Failed to cancel task"));
    }

    if task.status == TaskStatus::Running {
        state.runner.cancel_task(id).await;
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn get_stats(
    State(state): State<AppState>,
) -> Result<Json<orchestrator_db::models::QueueStats>, AppError> {
    let stats = state.queue.stats().await.map_err(AppError::internal)?;
    Ok(Json(stats))
}
