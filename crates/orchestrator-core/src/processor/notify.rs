//! Email notification via the `gmcli` CLI.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{info, warn};

const ATTACHMENT_MAX_BYTES: u64 = 10 * 1024 * 1024;
const ATTACHMENT_CANDIDATES: &[&str] = &[
    "report.pdf",
    "report.md",
    "output.pdf",
    "output.md",
    "README.md",
    "summary.md",
];

pub struct NotifyOutcome {
    pub sent: bool,
    pub error: Option<String>,
}

/// Find the file to attach to a completion email: the first name on the
/// priority list present in `outputs_path`, else the first `*.pdf` or
/// `*.md` file found.
pub fn find_main_output(outputs_path: &Path) -> Option<PathBuf> {
    for name in ATTACHMENT_CANDIDATES {
        let path = outputs_path.join(name);
        if path.is_file() {
            return Some(path);
        }
    }

    for ext in ["pdf", "md"] {
        let mut matches: Vec<_> = std::fs::read_dir(outputs_path)
            .ok()?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(ext))
            .collect();
        matches.sort();
        if let Some(first) = matches.into_iter().next() {
            return Some(first);
        }
    }

    None
}

fn build_body(title: &str, summary: Option<&str>, cloud_links: &BTreeMap<String, String>) -> String {
    let mut parts = vec![format!("Your task '{title}' has been completed."), String::new()];

    if let Some(summary) = summary {
        parts.push("## Summary".to_string());
        parts.push(summary.to_string());
        parts.push(String::new());
    }

    if !cloud_links.is_empty() {
        parts.push("## Results".to_string());
        for (service, url) in cloud_links {
            let label = match service.as_str() {
                "google_drive" => "Google Drive",
                "onedrive" => "OneDrive",
                other => other,
            };
            parts.push(format!("- {label}: {url}"));
        }
        parts.push(String::new());
    }

    parts.push("---".to_string());
    parts.push("Generated by the task orchestrator".to_string());

    parts.join("\n")
}

/// Send a completion notification for `title` to `to`, attaching the main
/// output file under `outputs_path` if one exists and is small enough.
pub async fn send_completion_email(
    to: &str,
    title: &str,
    outputs_path: &Path,
    summary: Option<&str>,
    cloud_links: &BTreeMap<String, String>,
) -> NotifyOutcome {
    let subject = format!("Task Complete: {title}");
    let body = build_body(title, summary, cloud_links);

    let mut args = vec![
        "send".to_string(),
        "--to".to_string(),
        to.to_string(),
        "--subject".to_string(),
        subject,
        "--body".to_string(),
        body,
    ];

    if let Some(attachment) = find_main_output(outputs_path) {
        let small_enough = std::fs::metadata(&attachment)
            .map(|m| m.len() < ATTACHMENT_MAX_BYTES)
            .unwrap_or(false);
        if small_enough {
            args.push("--attach".to_string());
            args.push(attachment.to_string_lossy().into_owned());
        }
    }

    let output = Command::new("gmcli").args(&args).output().await;

    match output {
        Ok(out) if out.status.success() => {
            info!(to, "sent completion email");
            NotifyOutcome { sent: true, error: None }
        }
        Ok(out) => {
            let stderr = String::from_utf8_lossy(&out.stderr).into_owned();
            let error = if stderr.is_empty() {
                format!("gmcli exited with code {}", out.status.code().unwrap_or(-1))
            } else {
                stderr
            };
            warn!(to, error = %error, "failed to send completion email");
            NotifyOutcome { sent: false, error: Some(error) }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => NotifyOutcome {
            sent: false,
            error: Some("gmcli not found. Is it installed?".to_string()),
        },
        Err(e) => NotifyOutcome {
            sent: false,
            error: Some(format!("failed to run gmcli: {e}")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_priority_candidate_over_glob_fallback() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "x").unwrap();
        std::fs::write(dir.path().join("report.md"), "x").unwrap();
        assert_eq!(
            find_main_output(dir.path()).unwrap().file_name().unwrap(),
            "report.md"
        );
    }

    #[test]
    fn falls_back_to_first_markdown_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "x").unwrap();
        assert_eq!(
            find_main_output(dir.path()).unwrap().file_name().unwrap(),
            "notes.md"
        );
    }

    #[test]
    fn returns_none_when_no_candidates_exist() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_main_output(dir.path()).is_none());
    }

    #[test]
    fn body_includes_summary_and_links() {
        let mut links = BTreeMap::new();
        links.insert("google_drive".to_string(), "https://drive.example/x".to_string());
        let body = build_body("My Task", Some("a short summary"), &links);
        assert!(body.contains("a short summary"));
        assert!(body.contains("Google Drive: https://drive.example/x"));
    }
}
