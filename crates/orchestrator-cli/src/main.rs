mod config;
mod log_cmd;
mod serve_cmd;
#[cfg(test)]
mod test_util;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::PgPool;
use uuid::Uuid;

use orchestrator_core::queue::{EnqueueRequest, TaskQueue};
use orchestrator_core::runner::ClaudeRunner;
use orchestrator_core::worker::Worker;
use orchestrator_db::models::TaskType;
use orchestrator_db::pool;

use config::{CliOverrides, ConfigFile, OrchestratorConfig};

#[derive(Parser)]
#[command(name = "orchestrator", about = "Durable task orchestrator for AI coding agents")]
struct Cli {
    /// Database URL (overrides ORCHESTRATOR_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an orchestrator config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/orchestrator")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create the database (if missing) and run migrations
    DbInit,
    /// Run the worker loop: poll the queue and execute tasks
    Run {
        /// Poll interval in seconds (overrides config/env)
        #[arg(long)]
        poll_interval: Option<u64>,
    },
    /// Run the HTTP API together with the worker loop, sharing one runner
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
        /// Poll interval in seconds (overrides config/env)
        #[arg(long)]
        poll_interval: Option<u64>,
    },
    /// Submit a new task directly, bypassing the HTTP API
    Enqueue {
        /// Task type: research, analysis or document
        r#type: String,
        /// Short human-readable title
        title: String,
        /// Longer description of the work to do
        #[arg(long)]
        description: Option<String>,
        /// Notify this address by email on completion
        #[arg(long)]
        email: Option<String>,
        /// Upload outputs to this cloud storage provider: google_drive or onedrive
        #[arg(long)]
        storage: Option<String>,
        /// Destination folder for the cloud upload
        #[arg(long)]
        folder: Option<String>,
        /// Override the default maximum attempt budget
        #[arg(long)]
        max_attempts: Option<i32>,
    },
    /// Show a task's details
    Get {
        task_id: String,
    },
    /// List tasks, optionally filtered by status
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Cancel a task that has not yet reached a terminal status
    Cancel {
        task_id: String,
    },
    /// Show the audit log recorded against a task
    Log {
        task_id: String,
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
    /// Show queue statistics by status
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => cmd_init(db_url, force),
        Commands::DbInit => cmd_db_init(cli.database_url).await,
        Commands::Run { poll_interval } => cmd_run(cli.database_url, poll_interval).await,
        Commands::Serve { bind, port, poll_interval } => {
            cmd_serve(cli.database_url, &bind, port, poll_interval).await
        }
        Commands::Enqueue {
            r#type,
            title,
            description,
            email,
            storage,
            folder,
            max_attempts,
        } => {
            cmd_enqueue(
                cli.database_url,
                r#type,
                title,
                description,
                email,
                storage,
                folder,
                max_attempts,
            )
            .await
        }
        Commands::Get { task_id } => cmd_get(cli.database_url, &task_id).await,
        Commands::List { status, limit } => cmd_list(cli.database_url, status, limit).await,
        Commands::Cancel { task_id } => cmd_cancel(cli.database_url, &task_id).await,
        Commands::Log { task_id, limit } => cmd_log(cli.database_url, &task_id, limit).await,
        Commands::Stats => cmd_stats(cli.database_url).await,
    }
}

fn cmd_init(db_url: String, force: bool) -> Result<()> {
    let path = config::config_path();
    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {} (use --force to overwrite)",
            path.display()
        );
    }

    let file = ConfigFile {
        database: config::DatabaseSection { url: Some(db_url) },
        ..Default::default()
    };
    config::save_config(&file)?;
    println!("Wrote config to {}", path.display());
    Ok(())
}

async fn connect(database_url: Option<String>) -> Result<(PgPool, OrchestratorConfig)> {
    let app_config = OrchestratorConfig::resolve(CliOverrides {
        database_url,
        ..Default::default()
    })?;
    pool::ensure_database_exists(&app_config.db_config).await?;
    let db_pool = pool::create_pool(&app_config.db_config).await?;
    pool::run_migrations(&db_pool, pool::default_migrations_path()).await?;
    Ok((db_pool, app_config))
}

async fn cmd_db_init(database_url: Option<String>) -> Result<()> {
    let (db_pool, app_config) = connect(database_url).await?;
    println!(
        "Database ready at {}",
        app_config.db_config.database_url
    );
    for (table, count) in pool::table_counts(&db_pool).await? {
        println!("  {table}: {count} rows");
    }
    db_pool.close().await;
    Ok(())
}

async fn cmd_run(database_url: Option<String>, poll_interval: Option<u64>) -> Result<()> {
    let (db_pool, app_config) = connect(database_url).await?;

    let queue = Arc::new(TaskQueue::new(
        db_pool,
        app_config.outputs_path.to_string_lossy(),
        app_config.retry,
    ));
    let runner = ClaudeRunner::new(app_config.runner);
    let interval = poll_interval
        .map(std::time::Duration::from_secs)
        .unwrap_or(app_config.worker_poll_interval);
    let worker = Arc::new(Worker::new(queue, runner, interval));

    // First Ctrl+C requests a graceful stop; a second forces an immediate exit.
    let got_first_signal = Arc::new(AtomicBool::new(false));
    let worker_for_signal = Arc::clone(&worker);
    let got_first_clone = Arc::clone(&got_first_signal);
    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_clone.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nStopping worker (Ctrl+C again to force)...");
            worker_for_signal.stop().await;
        }
    });

    worker.run().await;
    Ok(())
}

async fn cmd_serve(
    database_url: Option<String>,
    bind: &str,
    port: u16,
    poll_interval: Option<u64>,
) -> Result<()> {
    let (db_pool, app_config) = connect(database_url).await?;

    let queue = Arc::new(TaskQueue::new(
        db_pool,
        app_config.outputs_path.to_string_lossy(),
        app_config.retry,
    ));
    let runner = ClaudeRunner::new(app_config.runner);
    let interval = poll_interval
        .map(std::time::Duration::from_secs)
        .unwrap_or(app_config.worker_poll_interval);
    let worker = Arc::new(Worker::new(Arc::clone(&queue), runner.clone(), interval));

    serve_cmd::run_serve(queue, runner, worker, bind, port).await
}

#[allow(clippy::too_many_arguments)]
async fn cmd_enqueue(
    database_url: Option<String>,
    r#type: String,
    title: String,
    description: Option<String>,
    email: Option<String>,
    storage: Option<String>,
    folder: Option<String>,
    max_attempts: Option<i32>,
) -> Result<()> {
    let (db_pool, app_config) = connect(database_url).await?;
    let queue = TaskQueue::new(
        db_pool,
        app_config.outputs_path.to_string_lossy(),
        app_config.retry,
    );

    let task_type: TaskType = r#type
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid task type {:?}, expected research/analysis/document", r#type))?;

    let delivery = if email.is_some() || storage.is_some() || folder.is_some() {
        let storage = storage
            .map(|s| s.parse::<orchestrator_db::models::StorageProvider>())
            .transpose()
            .map_err(|_| anyhow::anyhow!("invalid storage provider, expected google_drive/onedrive"))?;
        Some(serde_json::json!({ "email": email, "storage": storage, "folder": folder }))
    } else {
        None
    };

    let task = queue
        .enqueue(EnqueueRequest {
            r#type: task_type,
            title,
            description,
            config: None,
            delivery,
            attachment_refs: None,
            max_attempts: max_attempts.unwrap_or(3),
            correlation_id: Some(Uuid::new_v4().to_string()),
        })
        .await?;

    println!("Queued task {} ({})", task.id, task.title);
    Ok(())
}

async fn cmd_get(database_url: Option<String>, task_id: &str) -> Result<()> {
    let (db_pool, app_config) = connect(database_url).await?;
    let queue = TaskQueue::new(
        db_pool,
        app_config.outputs_path.to_string_lossy(),
        app_config.retry,
    );

    let id = Uuid::parse_str(task_id).with_context(|| format!("invalid task ID: {task_id}"))?;
    let task = queue.get(id).await?.with_context(|| format!("task {id} not found"))?;
    println!("{}", serde_json::to_string_pretty(&task)?);
    Ok(())
}

async fn cmd_list(database_url: Option<String>, status: Option<String>, limit: i64) -> Result<()> {
    let (db_pool, app_config) = connect(database_url).await?;
    let queue = TaskQueue::new(
        db_pool,
        app_config.outputs_path.to_string_lossy(),
        app_config.retry,
    );

    let status = status
        .map(|s| s.parse::<orchestrator_db::models::TaskStatus>())
        .transpose()
        .map_err(|_| anyhow::anyhow!("invalid status"))?;

    let (tasks, total) = queue.list(status, limit, 0).await?;
    for task in &tasks {
        println!(
            "{}  {:<10} {:<9} {}",
            task.id, task.r#type, task.status, task.title
        );
    }
    println!("({} of {total} total)", tasks.len());
    Ok(())
}

async fn cmd_cancel(database_url: Option<String>, task_id: &str) -> Result<()> {
    let (db_pool, app_config) = connect(database_url).await?;
    let queue = TaskQueue::new(
        db_pool,
        app_config.outputs_path.to_string_lossy(),
        app_config.retry,
    );

    let id = Uuid::parse_str(task_id).with_context(|| format!("invalid task ID: {task_id}"))?;
    if queue.cancel(id).await? {
        println!("Cancelled task {id}");
    } else {
        println!("Task {id} is already in a terminal state, nothing to cancel");
    }
    Ok(())
}

async fn cmd_log(database_url: Option<String>, task_id: &str, limit: i64) -> Result<()> {
    let (db_pool, _app_config) = connect(database_url).await?;
    log_cmd::run_log(&db_pool, task_id, limit).await
}

async fn cmd_stats(database_url: Option<String>) -> Result<()> {
    let (db_pool, app_config) = connect(database_url).await?;
    let queue = TaskQueue::new(
        db_pool,
        app_config.outputs_path.to_string_lossy(),
        app_config.retry,
    );

    let stats = queue.stats().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
