//! Subprocess supervision for the `claude` agent CLI.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use orchestrator_db::models::{Task, TaskType};

use super::prompts;
use super::types::{AgentResult, RunnerConfig};

const CANCEL_GRACE: Duration = Duration::from_secs(5);
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Executes tasks by spawning and supervising the `claude` CLI.
///
/// Holds an in-memory map of live child process ids keyed by task id so an
/// external caller can cancel a running task by id without contending with
/// whichever task owns the `Child` and is reading its stdout/stderr. Entries
/// are inserted before the process is awaited and removed once it has been
/// reaped.
#[derive(Clone)]
pub struct ClaudeRunner {
    config: Arc<RunnerConfig>,
    active: Arc<Mutex<HashMap<Uuid, u32>>>,
}

impl ClaudeRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config: Arc::new(config),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run a task to completion (or timeout/cancellation), returning its
    /// [`AgentResult`].
    pub async fn execute(&self, task: &Task) -> AgentResult {
        let start = Instant::now();

        let outputs_path = match &task.outputs_path {
            Some(p) => p.clone(),
            None => {
                return AgentResult {
                    success: false,
                    error: Some("task has no outputs_path".to_string()),
                    ..Default::default()
                };
            }
        };
        if let Err(e) = std::fs::create_dir_all(&outputs_path) {
            return AgentResult {
                success: false,
                error: Some(format!("failed to create outputs directory: {e}")),
                ..Default::default()
            };
        }

        let prompt = prompts::compose(&self.config.prompts_path, task);
        let budget = self.config.budget_for(task.r#type);

        info!(
            task_id = %task.id,
            task_type = %task.r#type,
            timeout_secs = budget.timeout_secs,
            max_turns = budget.max_turns,
            "executing agent for task"
        );

        let mut result = self
            .run_claude(task.id, task.r#type, &prompt, budget.timeout_secs, &outputs_path)
            .await;
        result.duration_seconds = start.elapsed().as_secs_f64();

        if result.success {
            info!(task_id = %task.id, duration = result.duration_seconds, "agent completed task");
        } else {
            warn!(task_id = %task.id, error = ?result.error, "agent failed task");
        }

        result
    }

    /// Signal the running process for `task_id`, if any: SIGTERM, wait up to
    /// 5 seconds, then force kill. Idempotent; a no-op if no process is
    /// tracked for that id.
    ///
    /// Operates purely on the tracked pid rather than taking ownership of
    /// the `Child`, so it never contends with the task that is concurrently
    /// reading that child's stdout/stderr and reaping it in
    /// [`wait_for_output`].
    pub async fn cancel_task(&self, task_id: Uuid) -> bool {
        let Some(pid) = self.active.lock().await.remove(&task_id) else {
            return false;
        };

        #[cfg(unix)]
        {
            let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if ret != 0 {
                warn!(task_id = %task_id, "SIGTERM failed, will fall back to SIGKILL");
            }

            let deadline = Instant::now() + CANCEL_GRACE;
            loop {
                // Signal 0 sends nothing; it just probes whether the pid is
                // still alive (0 = yes, -1/ESRCH = reaped).
                let alive = unsafe { libc::kill(pid as i32, 0) } == 0;
                if !alive {
                    return true;
                }
                if Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
            }

            warn!(task_id = %task_id, "process did not exit within grace period, force killing");
            unsafe { libc::kill(pid as i32, libc::SIGKILL) };
        }

        true
    }

    async fn run_claude(
        &self,
        task_id: Uuid,
        task_type: TaskType,
        prompt: &str,
        timeout_secs: u64,
        cwd: &str,
    ) -> AgentResult {
        let mut cmd = Command::new(&self.config.claude_binary);
        cmd.arg("--print")
            .arg("--output-format")
            .arg("json")
            .arg("--dangerously-skip-permissions")
            .arg("--allowedTools")
            .arg(prompts::allowed_tools(task_type))
            .current_dir(cwd)
            .env("CLAUDE_CODE_SKILLS_PATH", &self.config.skills_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(key) = &self.config.anthropic_api_key {
            cmd.env("ANTHROPIC_API_KEY", key);
        }

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return AgentResult {
                    success: false,
                    error: Some("agent CLI not found".to_string()),
                    ..Default::default()
                };
            }
            Err(e) => {
                return AgentResult {
                    success: false,
                    error: Some(format!("failed to spawn agent CLI: {e}")),
                    ..Default::default()
                };
            }
        };

        let mut stdin = child.stdin.take();
        let prompt_owned = prompt.to_string();
        let write_task = tokio::spawn(async move {
            if let Some(stdin) = stdin.as_mut() {
                let _ = stdin.write_all(prompt_owned.as_bytes()).await;
            }
            // Dropping stdin here closes it, signalling EOF to the child.
        });

        // Track only the pid: `child` itself stays owned by this stack frame
        // for the whole wait, so `cancel_task` never has to contend with us
        // for it and can't observe a registered-but-absent entry.
        if let Some(pid) = child.id() {
            self.active.lock().await.insert(task_id, pid);
        }

        let wait_result = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            wait_for_output(&mut child),
        )
        .await;

        let _ = write_task.await;

        match wait_result {
            Ok(Ok((exit_code, stdout, stderr))) => {
                self.active.lock().await.remove(&task_id);
                classify(exit_code, &stdout, &stderr)
            }
            Ok(Err(e)) => {
                self.active.lock().await.remove(&task_id);
                AgentResult {
                    success: false,
                    error: Some(format!("failed to read agent output: {e}")),
                    ..Default::default()
                }
            }
            Err(_) => {
                warn!(task_id = %task_id, timeout_secs, "agent timed out");
                self.cancel_task(task_id).await;
                AgentResult {
                    success: false,
                    error: Some(format!("Execution timed out after {timeout_secs} seconds")),
                    partial: true,
                    ..Default::default()
                }
            }
        }
    }
}

/// Drain a child's stdout/stderr to completion and reap it. The caller keeps
/// ownership of `child` throughout, so this never races a concurrent
/// `cancel_task`, which only ever touches the tracked pid.
async fn wait_for_output(child: &mut Child) -> std::io::Result<(i32, String, String)> {
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    use tokio::io::AsyncReadExt;
    let mut stdout_buf = String::new();
    let mut stderr_buf = String::new();
    if let Some(s) = stdout.as_mut() {
        let _ = s.read_to_string(&mut stdout_buf).await;
    }
    if let Some(s) = stderr.as_mut() {
        let _ = s.read_to_string(&mut stderr_buf).await;
    }

    let status = child.wait().await?;
    Ok((status.code().unwrap_or(-1), stdout_buf, stderr_buf))
}

/// Classify a finished process's exit status into an [`AgentResult`].
fn classify(exit_code: i32, stdout: &str, stderr: &str) -> AgentResult {
    if exit_code == 0 {
        let turns_used = serde_json::from_str::<serde_json::Value>(stdout)
            .ok()
            .and_then(|v| v.get("turns").and_then(|t| t.as_i64()))
            .unwrap_or(0);

        AgentResult {
            success: true,
            output: Some(stdout.to_string()),
            turns_used,
            ..Default::default()
        }
    } else {
        let error = if stderr.trim().is_empty() {
            format!("Claude exited with code {exit_code}")
        } else {
            stderr.to_string()
        };
        AgentResult {
            success: false,
            error: Some(error),
            output: if stdout.is_empty() { None } else { Some(stdout.to_string()) },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_success_parses_turns_field() {
        let r = classify(0, r#"{"turns": 7}"#, "");
        assert!(r.success);
        assert_eq!(r.turns_used, 7);
    }

    #[test]
    fn classify_success_defaults_turns_to_zero_on_unparseable_output() {
        let r = classify(0, "not json", "");
        assert!(r.success);
        assert_eq!(r.turns_used, 0);
    }

    #[test]
    fn classify_failure_prefers_stderr() {
        let r = classify(1, "", "boom");
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("boom"));
    }

    #[test]
    fn classify_failure_falls_back_to_exit_code_message() {
        let r = classify(1, "", "");
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("Claude exited with code 1"));
    }
}
