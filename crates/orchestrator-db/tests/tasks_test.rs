//! Integration tests for task store CRUD and the atomic claim.
//!
//! These tests spin up a disposable PostgreSQL database via
//! `orchestrator-test-utils` (a shared testcontainers instance, or the URL
//! named by `ORCHESTRATOR_TEST_PG_URL`). Each test gets its own database and
//! drops it on completion.

use uuid::Uuid;

use orchestrator_db::models::{LogLevel, TaskStatus, TaskType};
use orchestrator_db::queries::tasks::{self, NewTask, TaskUpdate};

fn sample_task(id: Uuid) -> NewTask {
    NewTask {
        id,
        r#type: TaskType::Research,
        title: "Survey competitor pricing".to_string(),
        description: Some("Find and summarize public pricing pages.".to_string()),
        config: None,
        delivery: None,
        attachment_refs: None,
        max_attempts: 3,
        outputs_path: Some(format!("/data/outputs/{id}")),
        correlation_id: Some("corr-1".to_string()),
    }
}

#[tokio::test]
async fn insert_and_load_round_trip() {
    let (pool, db_name) = orchestrator_test_utils::create_test_db().await;

    let id = Uuid::new_v4();
    let inserted = tasks::insert_task(&pool, sample_task(id)).await.unwrap();
    assert_eq!(inserted.id, id);
    assert_eq!(inserted.status, TaskStatus::Queued);
    assert_eq!(inserted.attempts, 0);
    assert!(inserted.queued_at.is_some());

    let loaded = tasks::load_task(&pool, id).await.unwrap().unwrap();
    assert_eq!(loaded.title, "Survey competitor pricing");

    orchestrator_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn load_missing_task_returns_none() {
    let (pool, db_name) = orchestrator_test_utils::create_test_db().await;

    let result = tasks::load_task(&pool, Uuid::new_v4()).await.unwrap();
    assert!(result.is_none());

    orchestrator_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn claim_one_picks_oldest_queued_task_first() {
    let (pool, db_name) = orchestrator_test_utils::create_test_db().await;

    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    tasks::insert_task(&pool, sample_task(first)).await.unwrap();
    tasks::insert_task(&pool, sample_task(second)).await.unwrap();

    let claimed = tasks::claim_one(&pool).await.unwrap().unwrap();
    assert_eq!(claimed.id, first);
    assert_eq!(claimed.status, TaskStatus::Running);
    assert_eq!(claimed.attempts, 1);
    assert!(claimed.started_at.is_some());

    orchestrator_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn claim_one_returns_none_when_queue_empty() {
    let (pool, db_name) = orchestrator_test_utils::create_test_db().await;

    let claimed = tasks::claim_one(&pool).await.unwrap();
    assert!(claimed.is_none());

    orchestrator_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn claim_one_skips_retry_tasks_not_yet_due() {
    let (pool, db_name) = orchestrator_test_utils::create_test_db().await;

    let id = Uuid::new_v4();
    tasks::insert_task(&pool, sample_task(id)).await.unwrap();
    tasks::update_task(
        &pool,
        id,
        TaskUpdate {
            status: Some(TaskStatus::Retry),
            next_retry_at: Some(Some(chrono::Utc::now() + chrono::Duration::hours(1))),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let claimed = tasks::claim_one(&pool).await.unwrap();
    assert!(claimed.is_none());

    orchestrator_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn claim_one_takes_due_retry_task() {
    let (pool, db_name) = orchestrator_test_utils::create_test_db().await;

    let id = Uuid::new_v4();
    tasks::insert_task(&pool, sample_task(id)).await.unwrap();
    tasks::update_task(
        &pool,
        id,
        TaskUpdate {
            status: Some(TaskStatus::Retry),
            attempts: Some(1),
            next_retry_at: Some(Some(chrono::Utc::now() - chrono::Duration::seconds(1))),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let claimed = tasks::claim_one(&pool).await.unwrap().unwrap();
    assert_eq!(claimed.id, id);
    assert_eq!(claimed.status, TaskStatus::Running);
    assert_eq!(claimed.attempts, 2);

    orchestrator_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn update_task_is_sparse() {
    let (pool, db_name) = orchestrator_test_utils::create_test_db().await;

    let id = Uuid::new_v4();
    tasks::insert_task(&pool, sample_task(id)).await.unwrap();

    tasks::update_task(
        &pool,
        id,
        TaskUpdate {
            status: Some(TaskStatus::Processing),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let task = tasks::load_task(&pool, id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Processing);
    // Untouched fields remain as inserted.
    assert_eq!(task.title, "Survey competitor pricing");

    orchestrator_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn update_task_missing_id_errors() {
    let (pool, db_name) = orchestrator_test_utils::create_test_db().await;

    let result = tasks::update_task(
        &pool,
        Uuid::new_v4(),
        TaskUpdate {
            status: Some(TaskStatus::Completed),
            ..Default::default()
        },
    )
    .await;
    assert!(result.is_err());

    orchestrator_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn append_and_list_logs_newest_first() {
    let (pool, db_name) = orchestrator_test_utils::create_test_db().await;

    let id = Uuid::new_v4();
    tasks::insert_task(&pool, sample_task(id)).await.unwrap();

    tasks::append_log(&pool, id, LogLevel::Info, "task_queued", "queued", None, None)
        .await
        .unwrap();
    tasks::append_log(
        &pool,
        id,
        LogLevel::Warning,
        "task_retry_scheduled",
        "retry scheduled",
        Some(serde_json::json!({"attempt": 1})),
        None,
    )
    .await
    .unwrap();

    let logs = tasks::list_logs(&pool, id, 10).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].event, "task_retry_scheduled");
    assert_eq!(logs[1].event, "task_queued");

    orchestrator_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn count_by_status_reflects_inserted_tasks() {
    let (pool, db_name) = orchestrator_test_utils::create_test_db().await;

    tasks::insert_task(&pool, sample_task(Uuid::new_v4()))
        .await
        .unwrap();
    tasks::insert_task(&pool, sample_task(Uuid::new_v4()))
        .await
        .unwrap();

    let stats = tasks::count_by_status(&pool).await.unwrap();
    assert_eq!(stats.queued, 2);
    assert_eq!(stats.running, 0);

    orchestrator_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn list_tasks_filters_by_status_and_paginates() {
    let (pool, db_name) = orchestrator_test_utils::create_test_db().await;

    for _ in 0..3 {
        tasks::insert_task(&pool, sample_task(Uuid::new_v4()))
            .await
            .unwrap();
    }

    let (page, total) = tasks::list_tasks(&pool, Some(TaskStatus::Queued), 2, 0)
        .await
        .unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(total, 3);

    let (page2, _) = tasks::list_tasks(&pool, Some(TaskStatus::Queued), 2, 2)
        .await
        .unwrap();
    assert_eq!(page2.len(), 1);

    orchestrator_test_utils::drop_test_db(&db_name).await;
}
