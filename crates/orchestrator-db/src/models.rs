use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The kind of work a task asks an agent to perform.
///
/// The type selects the default prompt template, the allowed-tools list and
/// the execution timeout applied by the agent runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Research,
    Analysis,
    Document,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Research => "research",
            Self::Analysis => "analysis",
            Self::Document => "document",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskType {
    type Err = TaskTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "research" => Ok(Self::Research),
            "analysis" => Ok(Self::Analysis),
            "document" => Ok(Self::Document),
            other => Err(TaskTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskType`] string.
#[derive(Debug, Clone)]
pub struct TaskTypeParseError(pub String);

impl fmt::Display for TaskTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task type: {:?}", self.0)
    }
}

impl std::error::Error for TaskTypeParseError {}

// ---------------------------------------------------------------------------

/// Lifecycle status of a task.
///
/// See [`crate::queries::tasks::is_valid_transition`] in `orchestrator-core`
/// for the edges that are legal between these states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    Processing,
    Completed,
    Failed,
    Retry,
    Dead,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Retry => "retry",
            Self::Dead => "dead",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "retry" => Ok(Self::Retry),
            "dead" => Ok(Self::Dead),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// Severity of a [`TaskLog`] entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = LogLevelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            other => Err(LogLevelParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`LogLevel`] string.
#[derive(Debug, Clone)]
pub struct LogLevelParseError(pub String);

impl fmt::Display for LogLevelParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid log level: {:?}", self.0)
    }
}

impl std::error::Error for LogLevelParseError {}

// ---------------------------------------------------------------------------

/// Cloud destination a completed task's outputs can be uploaded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageProvider {
    GoogleDrive,
    Onedrive,
}

impl fmt::Display for StorageProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::GoogleDrive => "google_drive",
            Self::Onedrive => "onedrive",
        };
        f.write_str(s)
    }
}

impl FromStr for StorageProvider {
    type Err = StorageProviderParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google_drive" => Ok(Self::GoogleDrive),
            "onedrive" => Ok(Self::Onedrive),
            other => Err(StorageProviderParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`StorageProvider`] string.
#[derive(Debug, Clone)]
pub struct StorageProviderParseError(pub String);

impl fmt::Display for StorageProviderParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid storage provider: {:?}", self.0)
    }
}

impl std::error::Error for StorageProviderParseError {}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Where a task's results should be delivered once it completes.
///
/// Stored as a JSONB column on `tasks`. `storage` and `email` are
/// independent: a task can request either, both, or neither.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub email: Option<String>,
    pub storage: Option<StorageProvider>,
    pub folder: Option<String>,
}

impl Delivery {
    /// The default upload folder used when a task requests `storage` but
    /// does not name one explicitly.
    pub const DEFAULT_FOLDER: &str = "Orchestrator/Results";

    pub fn folder_or_default(&self) -> &str {
        self.folder.as_deref().unwrap_or(Self::DEFAULT_FOLDER)
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// A unit of work submitted for an agent to execute.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    #[sqlx(rename = "type")]
    pub r#type: TaskType,
    pub title: String,
    pub description: Option<String>,
    pub config: Option<serde_json::Value>,
    pub delivery: Option<serde_json::Value>,
    pub attachment_refs: Option<serde_json::Value>,
    pub status: TaskStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub outputs_path: Option<String>,
    pub result_summary: Option<String>,
    pub cloud_links: Option<serde_json::Value>,
    pub correlation_id: Option<String>,
}

impl Task {
    /// Parse the `delivery` JSON column, if present.
    pub fn delivery(&self) -> Option<Delivery> {
        self.delivery
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Parse the `attachment_refs` JSON column into a list of paths.
    pub fn attachment_refs(&self) -> Vec<String> {
        self.attachment_refs
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

/// An audit-trail entry recorded against a [`Task`].
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskLog {
    pub id: i64,
    pub task_id: Uuid,
    pub level: LogLevel,
    pub event: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<String>,
}

/// Per-status task counts, as returned by [`crate::queries::tasks::count_by_status`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: i64,
    pub queued: i64,
    pub running: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub retry: i64,
    pub dead: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_type_roundtrip() {
        for t in [TaskType::Research, TaskType::Analysis, TaskType::Document] {
            let s = t.to_string();
            assert_eq!(s.parse::<TaskType>().unwrap(), t);
        }
    }

    #[test]
    fn task_type_rejects_unknown() {
        assert!("bogus".parse::<TaskType>().is_err());
    }

    #[test]
    fn task_status_roundtrip() {
        for s in [
            TaskStatus::Pending,
            TaskStatus::Queued,
            TaskStatus::Running,
            TaskStatus::Processing,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Retry,
            TaskStatus::Dead,
        ] {
            assert_eq!(s.to_string().parse::<TaskStatus>().unwrap(), s);
        }
    }

    #[test]
    fn task_status_rejects_unknown() {
        assert!("bogus".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn log_level_roundtrip() {
        for l in [LogLevel::Info, LogLevel::Warning, LogLevel::Error] {
            assert_eq!(l.to_string().parse::<LogLevel>().unwrap(), l);
        }
    }

    #[test]
    fn storage_provider_roundtrip() {
        for p in [StorageProvider::GoogleDrive, StorageProvider::Onedrive] {
            assert_eq!(p.to_string().parse::<StorageProvider>().unwrap(), p);
        }
    }

    #[test]
    fn storage_provider_display_matches_wire_format() {
        assert_eq!(StorageProvider::GoogleDrive.to_string(), "google_drive");
        assert_eq!(StorageProvider::Onedrive.to_string(), "onedrive");
    }

    #[test]
    fn delivery_folder_defaults_when_absent() {
        let d = Delivery {
            email: None,
            storage: Some(StorageProvider::GoogleDrive),
            folder: None,
        };
        assert_eq!(d.folder_or_default(), Delivery::DEFAULT_FOLDER);
    }

    #[test]
    fn delivery_folder_honors_explicit_value() {
        let d = Delivery {
            email: None,
            storage: Some(StorageProvider::Onedrive),
            folder: Some("Custom/Path".to_string()),
        };
        assert_eq!(d.folder_or_default(), "Custom/Path");
    }

    #[test]
    fn delivery_deserializes_from_json() {
        let json = serde_json::json!({
            "email": "user@example.com",
            "storage": "onedrive",
            "folder": "Reports"
        });
        let d: Delivery = serde_json::from_value(json).unwrap();
        assert_eq!(d.email.as_deref(), Some("user@example.com"));
        assert_eq!(d.storage, Some(StorageProvider::Onedrive));
        assert_eq!(d.folder.as_deref(), Some("Reports"));
    }
}
