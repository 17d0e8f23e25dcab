//! Summary extraction from a completed task's output directory.

use std::path::Path;

const SUMMARY_CANDIDATES: &[&str] = &["README.md", "summary.md", "report.md", "output.md", "result.md"];
const MAX_LENGTH: usize = 500;

/// Find the text to summarise: the first matching well-known filename, else
/// the first `*.md` file, else the raw agent stdout.
pub fn extract_summary(outputs_path: &Path, agent_output: Option<&str>) -> Option<String> {
    for name in SUMMARY_CANDIDATES {
        let path = outputs_path.join(name);
        if let Ok(content) = std::fs::read_to_string(&path) {
            return Some(first_section(&content));
        }
    }

    if let Some(md) = first_markdown_file(outputs_path) {
        if let Ok(content) = std::fs::read_to_string(&md) {
            return Some(first_section(&content));
        }
    }

    agent_output.map(first_section)
}

fn first_markdown_file(outputs_path: &Path) -> Option<std::path::PathBuf> {
    let mut entries: Vec<_> = std::fs::read_dir(outputs_path)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("md"))
        .collect();
    entries.sort();
    entries.into_iter().next()
}

/// Take the prefix of `content` up to (excluding) the second top-level
/// heading, skipping fenced code blocks, trimmed and soft-capped at
/// [`MAX_LENGTH`] characters.
fn first_section(content: &str) -> String {
    let mut summary_lines: Vec<&str> = Vec::new();
    let mut in_code_block = false;
    let mut accumulated_len = 0usize;

    for line in content.trim().lines() {
        if line.trim_start().starts_with("```") {
            in_code_block = !in_code_block;
            continue;
        }
        if in_code_block {
            continue;
        }
        if summary_lines.is_empty() && line.trim().is_empty() {
            continue;
        }
        if line.starts_with('#') && !summary_lines.is_empty() {
            break;
        }

        accumulated_len += line.len();
        summary_lines.push(line);
        if accumulated_len > MAX_LENGTH {
            break;
        }
    }

    let summary = summary_lines.join("\n").trim().to_string();

    if summary.chars().count() > MAX_LENGTH {
        let truncated: String = summary.chars().take(MAX_LENGTH).collect();
        match truncated.rfind(' ') {
            Some(idx) => format!("{}...", &truncated[..idx]),
            None => format!("{truncated}..."),
        }
    } else {
        summary
    }
}
