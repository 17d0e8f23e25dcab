//! End-to-end lifecycle scenarios against a real database, driving the
//! queue the way the worker loop does without spawning an actual agent
//! process.

use orchestrator_core::queue::{EnqueueRequest, RetryConfig, TaskQueue};
use orchestrator_db::models::{TaskStatus, TaskType};
use orchestrator_test_utils::{create_test_db, drop_test_db};

fn fast_retry_config() -> RetryConfig {
    RetryConfig {
        base_delay_secs: 1,
        max_delay_secs: 10,
    }
}

async fn queue_with(db_name_prefix: &str, retry_config: RetryConfig) -> (TaskQueue, String) {
    let (pool, db_name) = create_test_db().await;
    let queue = TaskQueue::new(pool, "/tmp/orchestrator-test-outputs", retry_config);
    let _ = db_name_prefix;
    (queue, db_name)
}

#[tokio::test]
async fn happy_path_enqueue_dequeue_complete() {
    let (queue, db_name) = queue_with("happy", RetryConfig::default()).await;

    let task = queue
        .enqueue(EnqueueRequest {
            r#type: TaskType::Document,
            title: "Write a report".to_string(),
            description: Some("summarise the quarter".to_string()),
            config: None,
            delivery: None,
            attachment_refs: None,
            max_attempts: 3,
            correlation_id: None,
        })
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.attempts, 0);

    let claimed = queue.dequeue().await.unwrap().expect("task should be eligible");
    assert_eq!(claimed.id, task.id);
    assert_eq!(claimed.status, TaskStatus::Running);
    assert_eq!(claimed.attempts, 1);

    queue.mark_completed(task.id, Some("done".to_string()), None).await.unwrap();

    let fetched = queue.get(task.id).await.unwrap().unwrap();
    assert_eq!(fetched.status, TaskStatus::Completed);
    assert_eq!(fetched.attempts, 1);
    assert!(fetched.completed_at.is_some());
    assert!(fetched.completed_at.unwrap() >= fetched.started_at.unwrap());
    assert!(fetched.started_at.unwrap() >= fetched.queued_at.unwrap());

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn retry_then_succeed() {
    let (queue, db_name) = queue_with("retry", fast_retry_config()).await;

    let task = queue
        .enqueue(EnqueueRequest {
            r#type: TaskType::Analysis,
            title: "Analyse logs".to_string(),
            description: None,
            config: None,
            delivery: None,
            attachment_refs: None,
            max_attempts: 3,
            correlation_id: None,
        })
        .await
        .unwrap();

    let claimed = queue.dequeue().await.unwrap().unwrap();
    assert_eq!(claimed.attempts, 1);

    let status = queue.mark_failed(task.id, "transient network error", true).await.unwrap();
    assert_eq!(status, TaskStatus::Retry);

    let after_fail = queue.get(task.id).await.unwrap().unwrap();
    assert!(after_fail.next_retry_at.is_some());

    // Wait past the scheduled retry time, then claim again.
    tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
    let reclaimed = queue.dequeue().await.unwrap().expect("retry should become eligible");
    assert_eq!(reclaimed.id, task.id);
    assert_eq!(reclaimed.attempts, 2);
    assert_eq!(reclaimed.status, TaskStatus::Running);

    queue.mark_completed(task.id, None, None).await.unwrap();
    let fetched = queue.get(task.id).await.unwrap().unwrap();
    assert_eq!(fetched.status, TaskStatus::Completed);
    assert_eq!(fetched.attempts, 2);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn exhausts_to_dead() {
    let (queue, db_name) = queue_with("dead", fast_retry_config()).await;

    let task = queue
        .enqueue(EnqueueRequest {
            r#type: TaskType::Research,
            title: "Flaky task".to_string(),
            description: None,
            config: None,
            delivery: None,
            attachment_refs: None,
            max_attempts: 2,
            correlation_id: None,
        })
        .await
        .unwrap();

    queue.dequeue().await.unwrap().unwrap();
    let status = queue.mark_failed(task.id, "boom", true).await.unwrap();
    assert_eq!(status, TaskStatus::Retry);

    tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
    queue.dequeue().await.unwrap().unwrap();
    let status = queue.mark_failed(task.id, "boom again", true).await.unwrap();
    assert_eq!(status, TaskStatus::Dead);

    let fetched = queue.get(task.id).await.unwrap().unwrap();
    assert_eq!(fetched.status, TaskStatus::Dead);
    assert_eq!(fetched.attempts, 2);
    assert!(fetched.completed_at.is_some());

    let logs = queue.logs(task.id, 10).await.unwrap();
    assert!(logs.iter().any(|l| l.event == "task_dead"));

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn timeout_is_terminal_not_retried() {
    let (queue, db_name) = queue_with("timeout", RetryConfig::default()).await;

    let task = queue
        .enqueue(EnqueueRequest {
            r#type: TaskType::Document,
            title: "Slow task".to_string(),
            description: None,
            config: None,
            delivery: None,
            attachment_refs: None,
            max_attempts: 3,
            correlation_id: None,
        })
        .await
        .unwrap();

    queue.dequeue().await.unwrap().unwrap();
    // A partial result (timeout/cancellation) is never retried.
    let status = queue
        .mark_failed(task.id, "Execution timed out after 900 seconds", false)
        .await
        .unwrap();
    assert_eq!(status, TaskStatus::Failed);

    let fetched = queue.get(task.id).await.unwrap().unwrap();
    assert_eq!(fetched.status, TaskStatus::Failed);
    assert_eq!(fetched.attempts, 1);
    assert!(fetched.completed_at.is_some());

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn cancel_while_running_transitions_to_failed() {
    let (queue, db_name) = queue_with("cancel", RetryConfig::default()).await;

    let task = queue
        .enqueue(EnqueueRequest {
            r#type: TaskType::Research,
            title: "Long research job".to_string(),
            description: None,
            config: None,
            delivery: None,
            attachment_refs: None,
            max_attempts: 3,
            correlation_id: None,
        })
        .await
        .unwrap();

    queue.dequeue().await.unwrap().unwrap();
    let cancelled = queue.cancel(task.id).await.unwrap();
    assert!(cancelled);

    let fetched = queue.get(task.id).await.unwrap().unwrap();
    assert_eq!(fetched.status, TaskStatus::Failed);
    assert_eq!(fetched.last_error.as_deref(), Some("Cancelled by user"));

    // Cancelling an already-terminal task is a no-op.
    let cancelled_again = queue.cancel(task.id).await.unwrap();
    assert!(!cancelled_again);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn concurrent_dequeue_never_yields_the_same_task_twice() {
    let (queue, db_name) = queue_with("concurrent", RetryConfig::default()).await;

    for i in 0..5 {
        queue
            .enqueue(EnqueueRequest {
                r#type: TaskType::Document,
                title: format!("Task {i}"),
                description: None,
                config: None,
                delivery: None,
                attachment_refs: None,
                max_attempts: 3,
                correlation_id: None,
            })
            .await
            .unwrap();
    }

    let mut seen = std::collections::HashSet::new();
    for _ in 0..5 {
        let task = queue.dequeue().await.unwrap().expect("task should be available");
        assert!(seen.insert(task.id), "dequeue returned the same task twice");
    }
    assert!(queue.dequeue().await.unwrap().is_none());

    drop_test_db(&db_name).await;
}
