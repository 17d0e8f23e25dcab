//! Result processor: the post-execution pipeline that turns a successful
//! agent run into a stored summary, optional cloud uploads and an optional
//! completion email.

pub mod notify;
pub mod summary;
pub mod upload;

use std::collections::BTreeMap;
use std::path::Path;

use orchestrator_db::models::Task;

/// Outcome of processing one completed task's output.
#[derive(Debug, Default)]
pub struct ProcessingResult {
    pub summary: Option<String>,
    pub cloud_links: Option<serde_json::Value>,
    pub upload_errors: Vec<String>,
    pub notification_sent: bool,
    pub notification_error: Option<String>,
}

/// Run the post-execution pipeline for `task`, given the agent's raw stdout.
///
/// Upload and notification failures are recorded in the result but never
/// surfaced as an error from this function: the task has already succeeded
/// by the time processing runs.
pub async fn process(task: &Task, agent_output: Option<&str>) -> ProcessingResult {
    let mut result = ProcessingResult::default();

    let outputs_path = match &task.outputs_path {
        Some(p) => Path::new(p),
        None => return result,
    };

    result.summary = summary::extract_summary(outputs_path, agent_output);

    let Some(delivery) = task.delivery() else {
        return result;
    };

    let mut cloud_links = BTreeMap::new();

    if let Some(provider) = delivery.storage {
        let folder = delivery.folder_or_default();
        let outcome = upload::upload(provider, outputs_path, folder, task.id).await;
        if outcome.success {
            if let Some(url) = outcome.url {
                cloud_links.insert(provider.to_string(), url);
            }
        } else if let Some(error) = outcome.error {
            result.upload_errors.push(format!("{provider}: {error}"));
        }
    }

    if !cloud_links.is_empty() {
        result.cloud_links = serde_json::to_value(&cloud_links).ok();
    }

    if let Some(email) = &delivery.email {
        let outcome = notify::send_completion_email(
            email,
            &task.title,
            outputs_path,
            result.summary.as_deref(),
            &cloud_links,
        )
        .await;
        result.notification_sent = outcome.sent;
        result.notification_error = outcome.error;
    }

    result
}
