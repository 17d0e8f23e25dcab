//! The single-concurrency worker driver loop.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::processor;
use crate::queue::TaskQueue;
use crate::runner::ClaudeRunner;

/// Drives the poll/execute/process loop until told to stop.
///
/// Exactly one task is ever RUNNING under a given worker, matching
/// `workerMaxConcurrentTasks = 1`: the loop never starts a second
/// `execute` before the previous one's terminal state has been recorded.
pub struct Worker {
    queue: Arc<TaskQueue>,
    runner: ClaudeRunner,
    poll_interval: Duration,
    cancel: CancellationToken,
    current_task_id: StdMutex<Option<Uuid>>,
}

impl Worker {
    pub fn new(queue: Arc<TaskQueue>, runner: ClaudeRunner, poll_interval: Duration) -> Self {
        Self {
            queue,
            runner,
            poll_interval,
            cancel: CancellationToken::new(),
            current_task_id: StdMutex::new(None),
        }
    }

    /// A token that [`Worker::run`] observes; cancel it (or call
    /// [`Worker::stop`]) to end the loop after the in-flight task settles.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Signal shutdown: stop polling for new work and, if a task is
    /// currently running, cancel its agent process so it terminates
    /// promptly rather than running to its full timeout.
    pub async fn stop(&self) {
        info!("stopping worker");
        self.cancel.cancel();

        let current = *self.current_task_id.lock().expect("lock poisoned");
        if let Some(task_id) = current {
            info!(task_id = %task_id, "cancelling in-flight task for shutdown");
            self.runner.cancel_task(task_id).await;
        }
    }

    /// Run the driver loop until cancelled.
    pub async fn run(&self) {
        info!("worker started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let task = match self.queue.dequeue().await {
                Ok(t) => t,
                Err(e) => {
                    error!(error = %e, "failed to dequeue, backing off");
                    self.sleep_or_shutdown().await;
                    continue;
                }
            };

            let Some(task) = task else {
                self.sleep_or_shutdown().await;
                continue;
            };

            *self.current_task_id.lock().expect("lock poisoned") = Some(task.id);
            info!(task_id = %task.id, title = %task.title, "processing task");

            let outcome = self.run_one(&task).await;
            if let Err(e) = outcome {
                error!(task_id = %task.id, error = %e, "unexpected error processing task");
                if let Err(e) = self.queue.mark_failed(task.id, &e.to_string(), true).await {
                    error!(task_id = %task.id, error = %e, "failed to record task failure");
                }
            }

            *self.current_task_id.lock().expect("lock poisoned") = None;
        }

        info!("worker stopped");
    }

    async fn run_one(&self, task: &orchestrator_db::models::Task) -> anyhow::Result<()> {
        let result = self.runner.execute(task).await;

        if result.success {
            self.queue.mark_processing(task.id).await?;
            let processing = processor::process(task, result.output.as_deref()).await;
            if !processing.upload_errors.is_empty() {
                warn!(task_id = %task.id, errors = ?processing.upload_errors, "upload errors during processing");
            }
            if let Some(err) = &processing.notification_error {
                warn!(task_id = %task.id, error = %err, "notification failed during processing");
            }
            self.queue
                .mark_completed(task.id, processing.summary, processing.cloud_links)
                .await?;
        } else {
            let error = result.error.unwrap_or_else(|| "Unknown error".to_string());
            let new_status = self
                .queue
                .mark_failed(task.id, &error, !result.partial)
                .await?;
            warn!(task_id = %task.id, new_status = %new_status, partial = result.partial, "task failed");
        }

        Ok(())
    }

    async fn sleep_or_shutdown(&self) {
        tokio::select! {
            _ = tokio::time::sleep(self.poll_interval) => {}
            _ = self.cancel.cancelled() => {}
        }
    }
}
