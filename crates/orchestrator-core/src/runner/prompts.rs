//! Prompt composition: template lookup, default templates, and the
//! task-context block appended to every prompt.

use std::path::Path;

use orchestrator_db::models::Task;
use orchestrator_db::models::TaskType;

const DEFAULT_RESEARCH_PROMPT: &str = "\
# Research Task

You are a research agent. Your job is to thoroughly research the given topic and produce a comprehensive report.

## Instructions
1. Use web search and browser tools to gather information
2. Cite all sources with URLs
3. Organize findings into clear sections
4. Save the final report as markdown in the output directory
5. Include a summary at the beginning
";

const DEFAULT_ANALYSIS_PROMPT: &str = "\
# Analysis Task

You are a data analysis agent. Your job is to analyze the given data or topic and produce insights.

## Instructions
1. Gather relevant data using available tools
2. Analyze patterns and trends
3. Create visualizations if appropriate
4. Save the analysis report as markdown in the output directory
5. Include key findings at the beginning
";

const DEFAULT_DOCUMENT_PROMPT: &str = "\
# Document Generation Task

You are a document generation agent. Your job is to create professional documents based on the given requirements.

## Instructions
1. Follow the provided template or format requirements
2. Research any needed information
3. Generate clear, well-structured content
4. Save the document in the output directory
5. Review for accuracy and formatting
";

fn default_prompt(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::Research => DEFAULT_RESEARCH_PROMPT,
        TaskType::Analysis => DEFAULT_ANALYSIS_PROMPT,
        TaskType::Document => DEFAULT_DOCUMENT_PROMPT,
    }
}

/// Base prompt: a file named `<type>.md` under `prompts_path`, or the
/// built-in default for the type if the file doesn't exist.
pub fn base_prompt(prompts_path: &Path, task_type: TaskType) -> String {
    let candidate = prompts_path.join(format!("{task_type}.md"));
    std::fs::read_to_string(&candidate).unwrap_or_else(|_| default_prompt(task_type).to_string())
}

/// Render the task-context block appended after the base prompt: title,
/// description, outputs path, config, attachments, delivery instructions.
pub fn task_context_block(task: &Task) -> String {
    let mut block = format!(
        "\n## Task Details\n- **Title**: {}\n- **Description**: {}\n- **Output Directory**: {}\n",
        task.title,
        task.description.as_deref().unwrap_or(""),
        task.outputs_path.as_deref().unwrap_or(""),
    );

    if let Some(config) = &task.config {
        let pretty = serde_json::to_string_pretty(config).unwrap_or_default();
        block.push_str(&format!("\n## Configuration\n```json\n{pretty}\n```\n"));
    }

    let attachments = task.attachment_refs();
    if !attachments.is_empty() {
        block.push_str("\n## Attachments\n");
        for a in &attachments {
            block.push_str(&format!("- {a}\n"));
        }
    }

    if let Some(delivery) = task.delivery() {
        if delivery.email.is_some() || delivery.storage.is_some() {
            block.push_str("\n## Delivery Instructions\n");
            if let Some(email) = &delivery.email {
                block.push_str(&format!("- Send notification to: {email}\n"));
            }
            if let Some(storage) = delivery.storage {
                block.push_str(&format!(
                    "- Upload to {storage}: {}\n",
                    delivery.folder_or_default()
                ));
            }
        }
    }

    block
}

/// Compose the full prompt sent to the agent over stdin.
pub fn compose(prompts_path: &Path, task: &Task) -> String {
    let base = base_prompt(prompts_path, task.r#type);
    let context = task_context_block(task);
    format!("{base}\n\n{context}")
}

/// Base tools available regardless of task type.
const BASE_TOOLS: &[&str] = &["Read", "Write", "Bash", "Glob", "Grep", "Edit"];

/// Comma-separated `--allowedTools` value for a task type.
pub fn allowed_tools(task_type: TaskType) -> String {
    let mut tools: Vec<&str> = BASE_TOOLS.to_vec();
    match task_type {
        TaskType::Research => tools.extend(["WebFetch", "WebSearch", "Task"]),
        TaskType::Analysis => tools.extend(["WebFetch", "Task"]),
        TaskType::Document => {}
    }
    tools.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prompt_used_when_no_template_file() {
        let dir = tempfile::tempdir().unwrap();
        let prompt = base_prompt(dir.path(), TaskType::Research);
        assert!(prompt.contains("Research Task"));
    }

    #[test]
    fn template_file_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("document.md"), "custom template").unwrap();
        let prompt = base_prompt(dir.path(), TaskType::Document);
        assert_eq!(prompt, "custom template");
    }

    #[test]
    fn allowed_tools_per_type() {
        assert!(allowed_tools(TaskType::Research).contains("WebSearch"));
        assert!(!allowed_tools(TaskType::Document).contains("WebSearch"));
        assert!(allowed_tools(TaskType::Analysis).contains("WebFetch"));
        assert!(!allowed_tools(TaskType::Analysis).contains("WebSearch"));
        for t in [TaskType::Research, TaskType::Analysis, TaskType::Document] {
            for base in BASE_TOOLS {
                assert!(allowed_tools(t).contains(base));
            }
        }
    }
}
