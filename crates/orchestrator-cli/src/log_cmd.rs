//! `orchestrator log`: show the audit trail recorded against one task.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use orchestrator_db::models::LogLevel;
use orchestrator_db::queries::tasks;

pub async fn run_log(pool: &PgPool, task_id_str: &str, limit: i64) -> Result<()> {
    let task_id =
        Uuid::parse_str(task_id_str).with_context(|| format!("invalid task ID: {task_id_str}"))?;

    let task = tasks::load_task(pool, task_id)
        .await?
        .with_context(|| format!("task {task_id} not found"))?;

    println!("Task: {} ({})", task.title, task.id);
    println!(
        "Status: {} (attempt {}/{})",
        task.status, task.attempts, task.max_attempts
    );
    println!();

    let logs = tasks::list_logs(pool, task_id, limit).await?;
    if logs.is_empty() {
        println!("(no log entries)");
        return Ok(());
    }

    for entry in &logs {
        let level = match entry.level {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARN",
            LogLevel::Error => "ERROR",
        };
        println!(
            "[{}] {:<5} {:<24} {}",
            entry.timestamp.to_rfc3339(),
            level,
            entry.event,
            entry.message
        );
        if let Some(data) = &entry.data {
            println!("        {data}");
        }
    }

    Ok(())
}
