//! The task queue: a state-machine facade over the task store.
//!
//! Each public method here is the sole authorised mutator for the
//! transitions it performs, per the operator table this module implements.
//! Every mutation emits a [`TaskLog`] entry describing what happened.

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use anyhow::{Context, Result, bail};
use sqlx::PgPool;

use orchestrator_db::models::{LogLevel, QueueStats, Task, TaskLog, TaskStatus, TaskType};
use orchestrator_db::queries::tasks::{self, NewTask, TaskUpdate};

use crate::retry;
use crate::state;

/// Retry scheduler tuning, wired in from configuration.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: retry::DEFAULT_BASE_DELAY_SECS,
            max_delay_secs: retry::DEFAULT_MAX_DELAY_SECS,
        }
    }
}

/// Fields accepted by [`TaskQueue::enqueue`].
pub struct EnqueueRequest {
    pub r#type: TaskType,
    pub title: String,
    pub description: Option<String>,
    pub config: Option<Value>,
    pub delivery: Option<Value>,
    pub attachment_refs: Option<Value>,
    pub max_attempts: i32,
    pub correlation_id: Option<String>,
}

pub struct TaskQueue {
    pool: PgPool,
    outputs_root: String,
    retry_config: RetryConfig,
}

impl TaskQueue {
    pub fn new(pool: PgPool, outputs_root: impl Into<String>, retry_config: RetryConfig) -> Self {
        Self {
            pool,
            outputs_root: outputs_root.into(),
            retry_config,
        }
    }

    async fn log(
        &self,
        task_id: Uuid,
        level: LogLevel,
        event: &str,
        message: &str,
        data: Option<Value>,
        correlation_id: Option<&str>,
    ) -> Result<TaskLog> {
        tasks::append_log(&self.pool, task_id, level, event, message, data, correlation_id).await
    }

    /// Create a new task directly in `queued` status.
    pub async fn enqueue(&self, req: EnqueueRequest) -> Result<Task> {
        let id = Uuid::new_v4();
        let outputs_path = format!("{}/{id}", self.outputs_root.trim_end_matches('/'));

        let task = tasks::insert_task(
            &self.pool,
            NewTask {
                id,
                r#type: req.r#type,
                title: req.title.clone(),
                description: req.description,
                config: req.config,
                delivery: req.delivery,
                attachment_refs: req.attachment_refs,
                max_attempts: req.max_attempts,
                outputs_path: Some(outputs_path),
                correlation_id: req.correlation_id.clone(),
            },
        )
        .await
        .context("failed to enqueue task")?;

        self.log(
            id,
            LogLevel::Info,
            "task_queued",
            &format!("Task '{}' queued for processing", req.title),
            None,
            req.correlation_id.as_deref(),
        )
        .await?;

        Ok(task)
    }

    /// Atomically claim the next eligible task and move it to `running`.
    pub async fn dequeue(&self) -> Result<Option<Task>> {
        let Some(task) = tasks::claim_one(&self.pool).await? else {
            return Ok(None);
        };

        self.log(
            task.id,
            LogLevel::Info,
            "task_started",
            &format!(
                "Task started (attempt {}/{})",
                task.attempts, task.max_attempts
            ),
            None,
            task.correlation_id.as_deref(),
        )
        .await?;

        Ok(Some(task))
    }

    async fn require_task(&self, id: Uuid) -> Result<Task> {
        tasks::load_task(&self.pool, id)
            .await?
            .with_context(|| format!("task {id} not found"))
    }

    /// Move a `running` task into `processing`.
    pub async fn mark_processing(&self, id: Uuid) -> Result<()> {
        let task = self.require_task(id).await?;
        if task.status != TaskStatus::Running {
            bail!(
                "cannot mark task {id} processing: current status is {}, expected running",
                task.status
            );
        }
        debug_assert!(state::is_valid_transition(
            TaskStatus::Running,
            TaskStatus::Processing
        ));

        tasks::update_task(
            &self.pool,
            id,
            TaskUpdate {
                status: Some(TaskStatus::Processing),
                ..Default::default()
            },
        )
        .await?;

        self.log(
            id,
            LogLevel::Info,
            "task_processing",
            "Claude execution complete, processing results",
            None,
            task.correlation_id.as_deref(),
        )
        .await?;

        Ok(())
    }

    /// Move a `running` or `processing` task into `completed`.
    pub async fn mark_completed(
        &self,
        id: Uuid,
        summary: Option<String>,
        cloud_links: Option<Value>,
    ) -> Result<()> {
        let task = self.require_task(id).await?;
        if !matches!(task.status, TaskStatus::Running | TaskStatus::Processing) {
            bail!(
                "cannot complete task {id}: current status is {}, expected running or processing",
                task.status
            );
        }

        tasks::update_task(
            &self.pool,
            id,
            TaskUpdate {
                status: Some(TaskStatus::Completed),
                completed_at: Some(Some(Utc::now())),
                result_summary: Some(summary),
                cloud_links: Some(cloud_links),
                ..Default::default()
            },
        )
        .await?;

        self.log(
            id,
            LogLevel::Info,
            "task_completed",
            "Task completed successfully",
            None,
            task.correlation_id.as_deref(),
        )
        .await?;

        Ok(())
    }

    /// Move a `running` or `processing` task into `retry`, `dead`, or `failed`.
    ///
    /// `retry = true` means the failure is retryable in principle; whether
    /// the task actually retries still depends on remaining attempt budget.
    /// Returns the task's new status.
    pub async fn mark_failed(&self, id: Uuid, error: &str, retry: bool) -> Result<TaskStatus> {
        let task = self.require_task(id).await?;
        if !matches!(task.status, TaskStatus::Running | TaskStatus::Processing) {
            bail!(
                "cannot fail task {id}: current status is {}, expected running or processing",
                task.status
            );
        }

        if retry && task.attempts < task.max_attempts {
            let delay = retry::delay_for(
                task.attempts as u32,
                self.retry_config.base_delay_secs,
                self.retry_config.max_delay_secs,
            );
            let next_retry_at = Utc::now() + chrono::Duration::seconds(delay as i64);

            tasks::update_task(
                &self.pool,
                id,
                TaskUpdate {
                    status: Some(TaskStatus::Retry),
                    last_error: Some(Some(error.to_string())),
                    next_retry_at: Some(Some(next_retry_at)),
                    ..Default::default()
                },
            )
            .await?;

            self.log(
                id,
                LogLevel::Warning,
                "task_retry_scheduled",
                &format!("Task failed, retry scheduled in {delay}s: {error}"),
                Some(serde_json::json!({
                    "attempt": task.attempts,
                    "next_retry_at": next_retry_at.to_rfc3339(),
                })),
                task.correlation_id.as_deref(),
            )
            .await?;

            Ok(TaskStatus::Retry)
        } else {
            let new_status = if retry {
                TaskStatus::Dead
            } else {
                TaskStatus::Failed
            };

            tasks::update_task(
                &self.pool,
                id,
                TaskUpdate {
                    status: Some(new_status),
                    last_error: Some(Some(error.to_string())),
                    completed_at: Some(Some(Utc::now())),
                    ..Default::default()
                },
            )
            .await?;

            let event = if new_status == TaskStatus::Dead {
                "task_dead"
            } else {
                "task_failed"
            };

            self.log(
                id,
                LogLevel::Error,
                event,
                &format!("Task failed permanently: {error}"),
                Some(serde_json::json!({"attempts": task.attempts})),
                task.correlation_id.as_deref(),
            )
            .await?;

            Ok(new_status)
        }
    }

    /// Cancel a task that has not yet reached a terminal status.
    ///
    /// Returns `true` if the task was cancelled, `false` if it was already
    /// terminal (no-op, no log entry).
    pub async fn cancel(&self, id: Uuid) -> Result<bool> {
        let task = self.require_task(id).await?;
        if state::is_terminal(task.status) {
            return Ok(false);
        }

        tasks::update_task(
            &self.pool,
            id,
            TaskUpdate {
                status: Some(TaskStatus::Failed),
                last_error: Some(Some("Cancelled by user".to_string())),
                completed_at: Some(Some(Utc::now())),
                ..Default::default()
            },
        )
        .await?;

        self.log(
            id,
            LogLevel::Info,
            "task_cancelled",
            "Task cancelled by user",
            None,
            task.correlation_id.as_deref(),
        )
        .await?;

        Ok(true)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Task>> {
        tasks::load_task(&self.pool, id).await
    }

    pub async fn list(
        &self,
        status: Option<TaskStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Task>, i64)> {
        tasks::list_tasks(&self.pool, status, limit, offset).await
    }

    pub async fn logs(&self, id: Uuid, limit: i64) -> Result<Vec<TaskLog>> {
        tasks::list_logs(&self.pool, id, limit).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        tasks::count_by_status(&self.pool).await
    }
}
