//! Configuration for the orchestrator CLI.
//!
//! Provides an optional TOML config file at
//! `~/.config/orchestrator/config.toml` and a resolution chain for every
//! setting: CLI flag > env var > config file > compiled default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use orchestrator_core::queue::RetryConfig;
use orchestrator_core::runner::{RunnerConfig, TaskTypeBudget};
use orchestrator_db::config::DbConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub worker: WorkerSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PathsSection {
    pub outputs_path: Option<String>,
    pub logs_path: Option<String>,
    pub prompts_path: Option<String>,
    pub skills_path: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AgentSection {
    pub anthropic_api_key: Option<String>,
    pub research_timeout_minutes: Option<u64>,
    pub analysis_timeout_minutes: Option<u64>,
    pub document_timeout_minutes: Option<u64>,
    pub research_max_turns: Option<u32>,
    pub analysis_max_turns: Option<u32>,
    pub document_max_turns: Option<u32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RetrySection {
    pub max_task_attempts: Option<i32>,
    pub base_delay_seconds: Option<u64>,
    pub max_delay_seconds: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WorkerSection {
    pub poll_interval_seconds: Option<u64>,
    pub max_concurrent_tasks: Option<u32>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the orchestrator config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/orchestrator` or
/// `~/.config/orchestrator`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("orchestrator");
    }
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".config")
        .join("orchestrator")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

fn load_config_file() -> Option<ConfigFile> {
    let contents = std::fs::read_to_string(config_path()).ok()?;
    toml::from_str(&contents).ok()
}

// -----------------------------------------------------------------------
// Defaults (§6 Configuration, as minutes/seconds named in the spec)
// -----------------------------------------------------------------------

const DEFAULT_RESEARCH_TIMEOUT_MINUTES: u64 = 30;
const DEFAULT_ANALYSIS_TIMEOUT_MINUTES: u64 = 20;
const DEFAULT_DOCUMENT_TIMEOUT_MINUTES: u64 = 15;
const DEFAULT_RESEARCH_MAX_TURNS: u32 = 100;
const DEFAULT_ANALYSIS_MAX_TURNS: u32 = 50;
const DEFAULT_DOCUMENT_MAX_TURNS: u32 = 30;
const DEFAULT_MAX_TASK_ATTEMPTS: i32 = 3;
const DEFAULT_WORKER_POLL_INTERVAL_SECONDS: u64 = 5;

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_u64(key: &str) -> Option<u64> {
    env_string(key).and_then(|v| v.parse().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_string(key).and_then(|v| v.parse().ok())
}

fn env_i32(key: &str) -> Option<i32> {
    env_string(key).and_then(|v| v.parse().ok())
}

fn resolve<T: Clone>(cli: Option<T>, env: Option<T>, file: Option<T>, default: T) -> T {
    cli.or(env).or(file).unwrap_or(default)
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// CLI overrides accepted by `orchestrator run`, layered on top of env vars
/// and the config file.
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub database_url: Option<String>,
    pub outputs_path: Option<String>,
    pub logs_path: Option<String>,
    pub prompts_path: Option<String>,
    pub skills_path: Option<String>,
    pub poll_interval_seconds: Option<u64>,
}

/// Fully resolved configuration, ready for use by the worker and CLI.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub db_config: DbConfig,
    pub outputs_path: PathBuf,
    pub logs_path: PathBuf,
    pub retry: RetryConfig,
    pub worker_poll_interval: Duration,
    pub worker_max_concurrent_tasks: u32,
    pub runner: RunnerConfig,
}

impl OrchestratorConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config
    /// file > compiled default, independently per key.
    pub fn resolve(cli: CliOverrides) -> Result<Self> {
        let file = load_config_file().unwrap_or_default();

        let database_url = resolve(
            cli.database_url,
            env_string("ORCHESTRATOR_DATABASE_URL"),
            file.database.url.clone(),
            DbConfig::DEFAULT_URL.to_string(),
        );

        let outputs_path = resolve(
            cli.outputs_path,
            env_string("ORCHESTRATOR_OUTPUTS_PATH"),
            file.paths.outputs_path.clone(),
            "./outputs".to_string(),
        );
        let logs_path = resolve(
            cli.logs_path,
            env_string("ORCHESTRATOR_LOGS_PATH"),
            file.paths.logs_path.clone(),
            "./logs".to_string(),
        );
        let prompts_path = resolve(
            cli.prompts_path,
            env_string("ORCHESTRATOR_PROMPTS_PATH"),
            file.paths.prompts_path.clone(),
            "./prompts".to_string(),
        );
        let skills_path = resolve(
            cli.skills_path,
            env_string("ORCHESTRATOR_SKILLS_PATH"),
            file.paths.skills_path.clone(),
            "./skills".to_string(),
        );

        let anthropic_api_key = env_string("ANTHROPIC_API_KEY").or(file.agent.anthropic_api_key.clone());

        let research_timeout_minutes = resolve(
            None,
            env_u64("ORCHESTRATOR_RESEARCH_TIMEOUT_MINUTES"),
            file.agent.research_timeout_minutes,
            DEFAULT_RESEARCH_TIMEOUT_MINUTES,
        );
        let analysis_timeout_minutes = resolve(
            None,
            env_u64("ORCHESTRATOR_ANALYSIS_TIMEOUT_MINUTES"),
            file.agent.analysis_timeout_minutes,
            DEFAULT_ANALYSIS_TIMEOUT_MINUTES,
        );
        let document_timeout_minutes = resolve(
            None,
            env_u64("ORCHESTRATOR_DOCUMENT_TIMEOUT_MINUTES"),
            file.agent.document_timeout_minutes,
            DEFAULT_DOCUMENT_TIMEOUT_MINUTES,
        );
        let research_max_turns = resolve(
            None,
            env_u32("ORCHESTRATOR_RESEARCH_MAX_TURNS"),
            file.agent.research_max_turns,
            DEFAULT_RESEARCH_MAX_TURNS,
        );
        let analysis_max_turns = resolve(
            None,
            env_u32("ORCHESTRATOR_ANALYSIS_MAX_TURNS"),
            file.agent.analysis_max_turns,
            DEFAULT_ANALYSIS_MAX_TURNS,
        );
        let document_max_turns = resolve(
            None,
            env_u32("ORCHESTRATOR_DOCUMENT_MAX_TURNS"),
            file.agent.document_max_turns,
            DEFAULT_DOCUMENT_MAX_TURNS,
        );

        let max_task_attempts = resolve(
            None,
            env_i32("ORCHESTRATOR_MAX_TASK_ATTEMPTS"),
            file.retry.max_task_attempts,
            DEFAULT_MAX_TASK_ATTEMPTS,
        );
        let retry_base_delay_seconds = resolve(
            None,
            env_u64("ORCHESTRATOR_RETRY_BASE_DELAY_SECONDS"),
            file.retry.base_delay_seconds,
            orchestrator_core::retry::DEFAULT_BASE_DELAY_SECS,
        );
        let retry_max_delay_seconds = resolve(
            None,
            env_u64("ORCHESTRATOR_RETRY_MAX_DELAY_SECONDS"),
            file.retry.max_delay_seconds,
            orchestrator_core::retry::DEFAULT_MAX_DELAY_SECS,
        );

        let worker_poll_interval_seconds = resolve(
            cli.poll_interval_seconds,
            env_u64("ORCHESTRATOR_WORKER_POLL_INTERVAL_SECONDS"),
            file.worker.poll_interval_seconds,
            DEFAULT_WORKER_POLL_INTERVAL_SECONDS,
        );
        let worker_max_concurrent_tasks = resolve(
            None,
            env_u32("ORCHESTRATOR_WORKER_MAX_CONCURRENT_TASKS"),
            file.worker.max_concurrent_tasks,
            1,
        );

        // `max_task_attempts` is a queue-level setting (carried on each
        // task at enqueue time via NewTask.max_attempts), surfaced here so
        // the serve/enqueue path can default to it.
        let _ = max_task_attempts;

        Ok(Self {
            db_config: DbConfig::new(database_url),
            outputs_path: PathBuf::from(outputs_path),
            logs_path: PathBuf::from(logs_path),
            retry: RetryConfig {
                base_delay_secs: retry_base_delay_seconds,
                max_delay_secs: retry_max_delay_seconds,
            },
            worker_poll_interval: Duration::from_secs(worker_poll_interval_seconds),
            worker_max_concurrent_tasks,
            runner: RunnerConfig {
                prompts_path: PathBuf::from(prompts_path),
                skills_path: PathBuf::from(skills_path),
                anthropic_api_key,
                research: TaskTypeBudget {
                    timeout_secs: research_timeout_minutes * 60,
                    max_turns: research_max_turns,
                },
                analysis: TaskTypeBudget {
                    timeout_secs: analysis_timeout_minutes * 60,
                    max_turns: analysis_max_turns,
                },
                document: TaskTypeBudget {
                    timeout_secs: document_timeout_minutes * 60,
                    max_turns: document_max_turns,
                },
                claude_binary: "claude".to_string(),
            },
        })
    }

    pub fn max_task_attempts(&self) -> i32 {
        env_i32("ORCHESTRATOR_MAX_TASK_ATTEMPTS").unwrap_or(DEFAULT_MAX_TASK_ATTEMPTS)
    }
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        crate::test_util::lock_env()
    }

    #[test]
    fn resolve_defaults_when_nothing_set() {
        let _lock = lock_env();
        for key in [
            "ORCHESTRATOR_DATABASE_URL",
            "ORCHESTRATOR_OUTPUTS_PATH",
            "ORCHESTRATOR_WORKER_POLL_INTERVAL_SECONDS",
        ] {
            unsafe { std::env::remove_var(key) };
        }

        let config = OrchestratorConfig::resolve(CliOverrides::default()).unwrap();
        assert_eq!(config.db_config.database_url, DbConfig::DEFAULT_URL);
        assert_eq!(config.worker_poll_interval, Duration::from_secs(5));
        assert_eq!(config.runner.research.timeout_secs, 30 * 60);
        assert_eq!(config.runner.document.timeout_secs, 15 * 60);
    }

    #[test]
    fn cli_override_wins_over_env() {
        let _lock = lock_env();
        unsafe { std::env::set_var("ORCHESTRATOR_DATABASE_URL", "postgresql://env/db") };

        let config = OrchestratorConfig::resolve(CliOverrides {
            database_url: Some("postgresql://cli/db".to_string()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(config.db_config.database_url, "postgresql://cli/db");
        unsafe { std::env::remove_var("ORCHESTRATOR_DATABASE_URL") };
    }

    #[test]
    fn env_overrides_default_when_no_cli_flag() {
        let _lock = lock_env();
        unsafe { std::env::set_var("ORCHESTRATOR_WORKER_POLL_INTERVAL_SECONDS", "15") };

        let config = OrchestratorConfig::resolve(CliOverrides::default()).unwrap();
        assert_eq!(config.worker_poll_interval, Duration::from_secs(15));

        unsafe { std::env::remove_var("ORCHESTRATOR_WORKER_POLL_INTERVAL_SECONDS") };
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(path.ends_with("orchestrator/config.toml"));
    }
}
