//! Types shared across the agent runner.

/// Outcome of one agent execution attempt.
#[derive(Debug, Clone, Default)]
pub struct AgentResult {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub duration_seconds: f64,
    pub turns_used: i64,
    /// True when the run was interrupted by a timeout or an external
    /// cancellation rather than completing or failing on its own.
    pub partial: bool,
}

/// Per-task-type execution budget, resolved from configuration before the
/// runner is invoked.
#[derive(Debug, Clone, Copy)]
pub struct TaskTypeBudget {
    pub timeout_secs: u64,
    pub max_turns: u32,
}

/// Runtime configuration the runner needs beyond what's on the task itself.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub prompts_path: std::path::PathBuf,
    pub skills_path: std::path::PathBuf,
    pub anthropic_api_key: Option<String>,
    pub research: TaskTypeBudget,
    pub analysis: TaskTypeBudget,
    pub document: TaskTypeBudget,
    /// Path to the `claude` binary, defaults to `"claude"` (resolved via `$PATH`).
    pub claude_binary: String,
}

impl RunnerConfig {
    pub fn budget_for(&self, task_type: orchestrator_db::models::TaskType) -> TaskTypeBudget {
        use orchestrator_db::models::TaskType::*;
        match task_type {
            Research => self.research,
            Analysis => self.analysis,
            Document => self.document,
        }
    }
}
