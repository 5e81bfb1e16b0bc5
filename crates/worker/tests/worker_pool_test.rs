use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use taskq_core::{TaskPriority, TaskStatus, TaskSubmission};
use taskq_testing_utils::{
    echo_handler, failing_handler, fast_worker_config, flaky_handler, in_memory_queue, panicking_handler,
    queue_with_registry, sleeping_handler, FailingTaskRegistry, RecordingHandler, TestEnv,
};
use taskq_worker::{Worker, WorkerPool};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_end_to_end_ten_tasks_four_workers() {
    let queue = in_memory_queue();
    let pool = WorkerPool::new(Arc::clone(&queue), fast_worker_config(4));

    let mut task_ids = Vec::new();
    for i in 0..10 {
        let submission = TaskSubmission::new(echo_handler()).with_arg(json!(i));
        task_ids.push(queue.submit(submission).await.unwrap());
    }

    pool.start(4).await.unwrap();
    assert!(pool.wait_for_completion(Duration::from_secs(5)).await.unwrap());

    for (i, task_id) in task_ids.iter().enumerate() {
        let result = queue
            .wait(task_id, Some(Duration::from_secs(1)))
            .await
            .unwrap()
            .expect("result should exist");
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.result, Some(json!([i])));
    }

    let status = pool.status().await;
    let completed: u64 = status.workers.iter().map(|w| w.tasks_completed).sum();
    assert_eq!(completed, 10);
    assert_eq!(status.busy_workers, 0);

    pool.stop(Duration::from_secs(5)).await;
    assert!(!pool.is_running().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_each_task_executed_at_most_once() {
    let queue = in_memory_queue();
    let handler = RecordingHandler::with_delay(Duration::from_millis(2));
    for i in 0..100 {
        let priority = TaskPriority::try_from((i % 4 + 1) as u8).unwrap();
        queue
            .submit(
                TaskSubmission::new(handler.clone())
                    .with_arg(json!(i))
                    .with_priority(priority),
            )
            .await
            .unwrap();
    }

    let pool = WorkerPool::new(Arc::clone(&queue), fast_worker_config(8));
    pool.start(8).await.unwrap();
    assert!(pool.wait_for_completion(Duration::from_secs(20)).await.unwrap());
    pool.stop(Duration::from_secs(5)).await;

    let executions = handler.executions();
    assert_eq!(executions.len(), 100);
    assert!(executions.values().all(|count| *count == 1));
}

#[tokio::test]
async fn test_single_worker_follows_priority_order() {
    let queue = in_memory_queue();
    let handler = RecordingHandler::new();
    let priorities = [
        TaskPriority::Low,
        TaskPriority::Urgent,
        TaskPriority::Normal,
        TaskPriority::High,
    ];
    for priority in priorities {
        queue
            .submit(
                TaskSubmission::new(handler.clone())
                    .with_arg(json!(priority.to_string()))
                    .with_priority(priority),
            )
            .await
            .unwrap();
    }

    let pool = WorkerPool::new(Arc::clone(&queue), fast_worker_config(1));
    pool.start(1).await.unwrap();
    assert!(pool.wait_for_completion(Duration::from_secs(5)).await.unwrap());
    pool.stop(Duration::from_secs(2)).await;

    assert_eq!(
        handler.order(),
        vec![json!("URGENT"), json!("HIGH"), json!("NORMAL"), json!("LOW")]
    );
}

#[tokio::test]
async fn test_cancel_running_task_is_refused() {
    let queue = in_memory_queue();
    let worker = Worker::new("worker-0", Arc::clone(&queue), fast_worker_config(1));
    let task_id = queue
        .submit(TaskSubmission::new(sleeping_handler(Duration::from_millis(300))))
        .await
        .unwrap();

    worker.start().await;
    let started = TestEnv::wait_for(
        || {
            let queue = Arc::clone(&queue);
            let task_id = task_id.clone();
            async move { queue.status_of(&task_id).await.unwrap() == Some(TaskStatus::Running) }
        },
        Duration::from_secs(2),
    )
    .await;
    assert!(started);

    assert!(!queue.cancel(&task_id).await.unwrap());

    let result = queue
        .wait(&task_id, Some(Duration::from_secs(3)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.result, Some(json!("slept")));
    worker.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_cancelled_pending_task_produces_no_result() {
    let queue = in_memory_queue();
    let handler = RecordingHandler::new();
    let task_id = queue
        .submit(TaskSubmission::new(handler.clone()))
        .await
        .unwrap();
    assert!(queue.cancel(&task_id).await.unwrap());

    let pool = WorkerPool::new(Arc::clone(&queue), fast_worker_config(2));
    pool.start(2).await.unwrap();
    assert!(pool.wait_for_completion(Duration::from_secs(2)).await.unwrap());
    pool.stop(Duration::from_secs(2)).await;

    assert_eq!(handler.total_executions(), 0);
    assert!(queue.result_of(&task_id).await.unwrap().is_none());
    assert_eq!(queue.status_of(&task_id).await.unwrap(), Some(TaskStatus::Cancelled));
}

#[tokio::test]
async fn test_failed_task_retried_until_success() {
    let queue = in_memory_queue();
    let task_id = queue
        .submit(TaskSubmission::new(flaky_handler(1)).with_max_retries(2))
        .await
        .unwrap();

    let pool = WorkerPool::new(Arc::clone(&queue), fast_worker_config(1));
    pool.start(1).await.unwrap();

    let first = queue
        .wait(&task_id, Some(Duration::from_secs(3)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.status, TaskStatus::Failed);
    assert!(first.error.unwrap().contains("attempt 1 failed"));

    // 等待状态写回后再重试
    let failed = TestEnv::wait_for(
        || {
            let queue = Arc::clone(&queue);
            let task_id = task_id.clone();
            async move { queue.status_of(&task_id).await.unwrap() == Some(TaskStatus::Failed) }
        },
        Duration::from_secs(2),
    )
    .await;
    assert!(failed);
    assert!(queue.retry(&task_id).await.unwrap());

    let second = queue
        .wait(&task_id, Some(Duration::from_secs(3)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.status, TaskStatus::Completed);
    assert_eq!(second.metadata.get("retry_count"), Some(&json!(1)));

    pool.stop(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_worker_backs_off_after_registry_errors() {
    let registry = Arc::new(FailingTaskRegistry::new());
    let queue = queue_with_registry(registry.clone());
    let task_id = queue
        .submit(TaskSubmission::new(echo_handler()).with_arg(json!("ok")))
        .await
        .unwrap();
    registry.fail_next_gets(3);

    let worker = Worker::new("worker-0", Arc::clone(&queue), fast_worker_config(1));
    worker.start().await;

    // 注入的错误全部被Worker消耗之后再调用wait，避免wait自身读到错误
    let registry_for_check = Arc::clone(&registry);
    assert!(
        TestEnv::wait_for(
            || {
                let registry = Arc::clone(&registry_for_check);
                async move { registry.failures_injected() >= 3 }
            },
            Duration::from_secs(2),
        )
        .await
    );

    let result = queue
        .wait(&task_id, Some(Duration::from_secs(5)))
        .await
        .unwrap()
        .expect("task should eventually run");
    assert_eq!(result.status, TaskStatus::Completed);
    assert!(registry.failures_injected() >= 3);
    assert!(worker.is_running());

    worker.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_save_result_failure_marks_task_failed() {
    let registry = Arc::new(FailingTaskRegistry::new());
    let queue = queue_with_registry(registry.clone());
    let worker = Worker::new("worker-0", Arc::clone(&queue), fast_worker_config(1));
    registry.fail_save_result(true);

    queue
        .submit(TaskSubmission::new(failing_handler("never stored")))
        .await
        .unwrap();
    let task = queue.next_ready().await.unwrap().unwrap();

    assert!(worker.execute(task.clone()).await.is_err());
    assert_eq!(
        queue.status_of(&task.task_id).await.unwrap(),
        Some(TaskStatus::Failed)
    );
    assert!(!worker.is_busy());
}

#[tokio::test]
async fn test_stop_during_long_task_detaches_after_timeout() {
    let queue = in_memory_queue();
    let worker = Worker::new("worker-0", Arc::clone(&queue), fast_worker_config(1));
    let task_id = queue
        .submit(TaskSubmission::new(sleeping_handler(Duration::from_millis(500))))
        .await
        .unwrap();

    worker.start().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stopped = worker.stop(Duration::from_millis(50)).await.unwrap();
    assert!(!stopped);

    // 被放弃等待的循环仍会把当前任务执行完
    let result = queue
        .wait(&task_id, Some(Duration::from_secs(2)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_restart_after_timed_out_stop_keeps_single_loop() {
    let queue = in_memory_queue();
    let worker = Worker::new("worker-0", Arc::clone(&queue), fast_worker_config(1));
    let first = queue
        .submit(TaskSubmission::new(sleeping_handler(Duration::from_millis(400))))
        .await
        .unwrap();

    worker.start().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!worker.stop(Duration::from_millis(20)).await.unwrap());

    // 旧循环仍在执行任务，再次启动不会产生第二个循环
    worker.start().await;
    let second = queue
        .submit(TaskSubmission::new(echo_handler()).with_arg(json!("second")))
        .await
        .unwrap();

    let result = queue
        .wait(&first, Some(Duration::from_secs(2)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.status, TaskStatus::Completed);

    let stopped = TestEnv::wait_for(
        || {
            let running = worker.is_running();
            async move { !running }
        },
        Duration::from_secs(2),
    )
    .await;
    assert!(stopped);
    assert_eq!(queue.status_of(&second).await.unwrap(), Some(TaskStatus::Pending));

    // 旧循环退出后可以正常重启
    assert!(worker.stop(Duration::from_secs(1)).await.unwrap());
    worker.start().await;
    assert!(worker.is_running());
    let result = queue
        .wait(&second, Some(Duration::from_secs(2)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.result, Some(json!(["second"])));
    assert!(worker.is_running());

    worker.stop(Duration::from_secs(1)).await.unwrap();
    assert!(!worker.is_running());
}

#[tokio::test]
async fn test_worker_survives_panicking_handler() {
    let queue = in_memory_queue();
    let panicked = queue
        .submit(TaskSubmission::new(panicking_handler("handler bug")))
        .await
        .unwrap();
    let healthy = queue
        .submit(TaskSubmission::new(echo_handler()).with_arg(json!(1)))
        .await
        .unwrap();

    let pool = WorkerPool::new(Arc::clone(&queue), fast_worker_config(1));
    pool.start(1).await.unwrap();
    assert!(pool.wait_for_completion(Duration::from_secs(5)).await.unwrap());

    let failed = queue.result_of(&panicked).await.unwrap().unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.error.unwrap().contains("handler bug"));

    let ok = queue.result_of(&healthy).await.unwrap().unwrap();
    assert_eq!(ok.status, TaskStatus::Completed);
    assert_eq!(pool.active_workers().await.len(), 1);

    pool.stop(Duration::from_secs(2)).await;
}
