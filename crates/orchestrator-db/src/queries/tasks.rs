//! Database query functions for the `tasks` and `task_logs` tables.
//!
//! These are the low-level, single-statement Task Store primitives. Business
//! rules (state machine edges, retry backoff, emitted log events) live one
//! layer up in `orchestrator-core`'s task queue.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, QueryBuilder};
use uuid::Uuid;

use anyhow::{Context, Result};

use crate::models::{LogLevel, QueueStats, Task, TaskLog, TaskStatus, TaskType};

/// Fields required to create a new task. The task is inserted directly into
/// `queued` status with `queued_at` set to the insert time, matching the
/// submission contract: a task is runnable the moment it is accepted.
pub struct NewTask {
    pub id: Uuid,
    pub r#type: TaskType,
    pub title: String,
    pub description: Option<String>,
    pub config: Option<Value>,
    pub delivery: Option<Value>,
    pub attachment_refs: Option<Value>,
    pub max_attempts: i32,
    pub outputs_path: Option<String>,
    pub correlation_id: Option<String>,
}

/// Insert a new task, already in `queued` status.
pub async fn insert_task(pool: &PgPool, new_task: NewTask) -> Result<Task> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks \
            (id, type, title, description, config, delivery, attachment_refs, \
             status, attempts, max_attempts, outputs_path, correlation_id, queued_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, 'queued', 0, $8, $9, $10, now()) \
         RETURNING *",
    )
    .bind(new_task.id)
    .bind(new_task.r#type)
    .bind(new_task.title)
    .bind(new_task.description)
    .bind(new_task.config)
    .bind(new_task.delivery)
    .bind(new_task.attachment_refs)
    .bind(new_task.max_attempts)
    .bind(new_task.outputs_path)
    .bind(new_task.correlation_id)
    .fetch_one(pool)
    .await
    .context("failed to insert task")?;

    Ok(task)
}

/// Fetch a single task by ID.
pub async fn load_task(pool: &PgPool, id: Uuid) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to load task")?;

    Ok(task)
}

/// List tasks, optionally filtered by status, newest first. Returns the page
/// of tasks alongside the total count matching the filter (ignoring
/// pagination), for building paginated list responses.
pub async fn list_tasks(
    pool: &PgPool,
    status: Option<TaskStatus>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Task>, i64)> {
    let tasks = match status {
        Some(status) => {
            sqlx::query_as::<_, Task>(
                "SELECT * FROM tasks WHERE status = $1 \
                 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            )
            .bind(status)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, Task>(
                "SELECT * FROM tasks ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
        }
    }
    .context("failed to list tasks")?;

    let total: i64 = match status {
        Some(status) => {
            sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE status = $1")
                .bind(status)
                .fetch_one(pool)
                .await
        }
        None => {
            sqlx::query_scalar("SELECT COUNT(*) FROM tasks")
                .fetch_one(pool)
                .await
        }
    }
    .context("failed to count tasks")?;

    Ok((tasks, total))
}

/// Sparse patch applied by [`update_task`]. Every field is `None` by
/// default; set only the fields you want to change. Nullable columns use a
/// nested `Option` so a patch can distinguish "leave alone" from "set to
/// NULL".
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub attempts: Option<i32>,
    pub last_error: Option<Option<String>>,
    pub next_retry_at: Option<Option<DateTime<Utc>>>,
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
    pub outputs_path: Option<Option<String>>,
    pub result_summary: Option<Option<String>>,
    pub cloud_links: Option<Option<Value>>,
}

/// Apply an unconditional update to a task's mutable fields.
///
/// Callers that need compare-and-swap semantics should use [`claim_one`] or
/// add a dedicated optimistic-locking query instead; this function always
/// writes, regardless of the task's current status.
pub async fn update_task(pool: &PgPool, id: Uuid, patch: TaskUpdate) -> Result<()> {
    let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new("UPDATE tasks SET ");
    let mut first = true;

    macro_rules! set_field {
        ($col:literal, $val:expr) => {{
            if !first {
                builder.push(", ");
            }
            first = false;
            builder.push(concat!($col, " = "));
            builder.push_bind($val);
        }};
    }

    if let Some(status) = patch.status {
        set_field!("status", status);
    }
    if let Some(attempts) = patch.attempts {
        set_field!("attempts", attempts);
    }
    if let Some(last_error) = patch.last_error {
        set_field!("last_error", last_error);
    }
    if let Some(next_retry_at) = patch.next_retry_at {
        set_field!("next_retry_at", next_retry_at);
    }
    if let Some(started_at) = patch.started_at {
        set_field!("started_at", started_at);
    }
    if let Some(completed_at) = patch.completed_at {
        set_field!("completed_at", completed_at);
    }
    if let Some(outputs_path) = patch.outputs_path {
        set_field!("outputs_path", outputs_path);
    }
    if let Some(result_summary) = patch.result_summary {
        set_field!("result_summary", result_summary);
    }
    if let Some(cloud_links) = patch.cloud_links {
        set_field!("cloud_links", cloud_links);
    }

    if first {
        // Nothing to update.
        return Ok(());
    }

    builder.push(" WHERE id = ");
    builder.push_bind(id);

    let result = builder
        .build()
        .execute(pool)
        .await
        .context("failed to update task")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("task {id} not found");
    }

    Ok(())
}

/// Atomically claim the next runnable task: one sitting in `queued`, or one
/// in `retry` whose `next_retry_at` has elapsed. Ties are broken by creation
/// order (FIFO). Uses `FOR UPDATE SKIP LOCKED` so concurrent callers never
/// claim the same row, and moves the claimed task straight to `running`,
/// incrementing `attempts`.
///
/// Returns `None` if no runnable task exists.
pub async fn claim_one(pool: &PgPool) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>(
        "WITH next AS ( \
            SELECT id FROM tasks \
            WHERE status = 'queued' \
               OR (status = 'retry' AND next_retry_at <= now()) \
            ORDER BY created_at ASC \
            FOR UPDATE SKIP LOCKED \
            LIMIT 1 \
         ) \
         UPDATE tasks \
         SET status = 'running', attempts = attempts + 1, started_at = now() \
         FROM next \
         WHERE tasks.id = next.id \
         RETURNING tasks.*",
    )
    .fetch_optional(pool)
    .await
    .context("failed to claim task")?;

    Ok(task)
}

/// Append an entry to a task's log.
#[allow(clippy::too_many_arguments)]
pub async fn append_log(
    pool: &PgPool,
    task_id: Uuid,
    level: LogLevel,
    event: &str,
    message: &str,
    data: Option<Value>,
    correlation_id: Option<&str>,
) -> Result<TaskLog> {
    let log = sqlx::query_as::<_, TaskLog>(
        "INSERT INTO task_logs (task_id, level, event, message, data, correlation_id) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING *",
    )
    .bind(task_id)
    .bind(level)
    .bind(event)
    .bind(message)
    .bind(data)
    .bind(correlation_id)
    .fetch_one(pool)
    .await
    .context("failed to append task log")?;

    Ok(log)
}

/// List a task's log entries, newest first.
pub async fn list_logs(pool: &PgPool, task_id: Uuid, limit: i64) -> Result<Vec<TaskLog>> {
    let logs = sqlx::query_as::<_, TaskLog>(
        "SELECT * FROM task_logs WHERE task_id = $1 ORDER BY timestamp DESC LIMIT $2",
    )
    .bind(task_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to list task logs")?;

    Ok(logs)
}

/// Count tasks grouped by status, for the queue stats endpoint.
pub async fn count_by_status(pool: &PgPool) -> Result<QueueStats> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM tasks GROUP BY status")
            .fetch_all(pool)
            .await
            .context("failed to count tasks by status")?;

    let mut stats = QueueStats::default();
    for (status, count) in rows {
        match status.as_str() {
            "pending" => stats.pending = count,
            "queued" => stats.queued = count,
            "running" => stats.running = count,
            "processing" => stats.processing = count,
            "completed" => stats.completed = count,
            "failed" => stats.failed = count,
            "retry" => stats.retry = count,
            "dead" => stats.dead = count,
            _ => {}
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_update_default_is_empty() {
        let patch = TaskUpdate::default();
        assert!(patch.status.is_none());
        assert!(patch.last_error.is_none());
    }
}
