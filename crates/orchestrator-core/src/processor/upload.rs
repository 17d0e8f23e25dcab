//! Cloud upload sinks invoked as part of result processing.

use std::path::Path;

use regex::Regex;
use tokio::process::Command;
use tracing::{info, warn};
use uuid::Uuid;

use orchestrator_db::models::StorageProvider;

/// Outcome of one upload attempt.
pub struct UploadOutcome {
    pub success: bool,
    pub url: Option<String>,
    pub error: Option<String>,
}

fn files_to_upload(outputs_path: &Path) -> std::io::Result<Vec<std::path::PathBuf>> {
    let mut files: Vec<_> = std::fs::read_dir(outputs_path)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && !p
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'))
        })
        .collect();
    files.sort();
    Ok(files)
}

async fn run(cmd: &str, args: &[&str]) -> Result<(bool, String, String), String> {
    let output = Command::new(cmd)
        .args(args)
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                format!("{cmd} not found. Is it installed?")
            } else {
                format!("failed to run {cmd}: {e}")
            }
        })?;

    Ok((
        output.status.success(),
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    ))
}

/// Upload every file under `outputs_path` to Google Drive via `gdcli`, then
/// share the destination folder and extract its share URL.
pub async fn upload_to_gdrive(outputs_path: &Path, folder: &str, task_id: Uuid) -> UploadOutcome {
    let target_folder = format!("{folder}/{task_id}");

    let files = match files_to_upload(outputs_path) {
        Ok(f) if !f.is_empty() => f,
        Ok(_) => {
            return UploadOutcome {
                success: false,
                url: None,
                error: Some("No files to upload".to_string()),
            };
        }
        Err(e) => {
            return UploadOutcome {
                success: false,
                url: None,
                error: Some(format!("failed to list outputs directory: {e}")),
            };
        }
    };

    for file in &files {
        let file_str = file.to_string_lossy();
        match run("gdcli", &["upload", &file_str, &target_folder]).await {
            Ok((true, _, _)) => {}
            Ok((false, _, stderr)) => {
                let error = if stderr.is_empty() {
                    "upload failed".to_string()
                } else {
                    stderr
                };
                warn!(file = %file_str, error = %error, "failed to upload file to Google Drive");
                return UploadOutcome {
                    success: false,
                    url: None,
                    error: Some(error),
                };
            }
            Err(error) => {
                return UploadOutcome {
                    success: false,
                    url: None,
                    error: Some(error),
                };
            }
        }
    }

    let share_result = run(
        "gdcli",
        &["share", &target_folder, "--anyone", "--role", "reader"],
    )
    .await;

    let url = match share_result {
        Ok((true, stdout, _)) => extract_url(&stdout, r"https://drive\.google\.com/\S+")
            .unwrap_or_else(|| format!("gdrive://{target_folder}")),
        _ => format!("gdrive://{target_folder}"),
    };

    info!(files = files.len(), folder = %target_folder, "uploaded files to Google Drive");
    UploadOutcome {
        success: true,
        url: Some(url),
        error: None,
    }
}

/// Upload every file under `outputs_path` to OneDrive via the `onedrive`
/// CLI, then make the destination folder readable and extract its URL.
pub async fn upload_to_onedrive(outputs_path: &Path, folder: &str, task_id: Uuid) -> UploadOutcome {
    let target_folder = format!("{folder}/{task_id}");

    let files = match files_to_upload(outputs_path) {
        Ok(f) if !f.is_empty() => f,
        Ok(_) => {
            return UploadOutcome {
                success: false,
                url: None,
                error: Some("No files to upload".to_string()),
            };
        }
        Err(e) => {
            return UploadOutcome {
                success: false,
                url: None,
                error: Some(format!("failed to list outputs directory: {e}")),
            };
        }
    };

    for file in &files {
        let file_str = file.to_string_lossy();
        let name = file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let target_path = format!("{target_folder}/{name}");
        match run("onedrive", &["cp", &file_str, &target_path]).await {
            Ok((true, _, _)) => {}
            Ok((false, _, stderr)) => {
                let error = if stderr.is_empty() {
                    "upload failed".to_string()
                } else {
                    stderr
                };
                warn!(file = %file_str, error = %error, "failed to upload file to OneDrive");
                return UploadOutcome {
                    success: false,
                    url: None,
                    error: Some(error),
                };
            }
            Err(error) => {
                return UploadOutcome {
                    success: false,
                    url: None,
                    error: Some(error),
                };
            }
        }
    }

    let chmod_result = run("onedrive", &["chmod", &target_folder, "+r"]).await;

    let url = match chmod_result {
        Ok((true, stdout, _)) => {
            extract_url(&stdout, r"https://\S+").unwrap_or_else(|| format!("onedrive://{target_folder}"))
        }
        _ => format!("onedrive://{target_folder}"),
    };

    info!(files = files.len(), folder = %target_folder, "uploaded files to OneDrive");
    UploadOutcome {
        success: true,
        url: Some(url),
        error: None,
    }
}

fn extract_url(haystack: &str, pattern: &str) -> Option<String> {
    Regex::new(pattern)
        .ok()?
        .find(haystack)
        .map(|m| m.as_str().to_string())
}

/// Dispatch to the configured storage provider.
pub async fn upload(
    provider: StorageProvider,
    outputs_path: &Path,
    folder: &str,
    task_id: Uuid,
) -> UploadOutcome {
    match provider {
        StorageProvider::GoogleDrive => upload_to_gdrive(outputs_path, folder, task_id).await,
        StorageProvider::Onedrive => upload_to_onedrive(outputs_path, folder, task_id).await,
    }
}
