//! Test helper utilities and common testing patterns

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use taskq_core::{QueueConfig, WorkerConfig};
use taskq_dispatcher::{InMemoryTaskRegistry, QueueManager, TaskRegistry};
use tokio::time::sleep;

/// Queue config with short poll intervals
pub fn fast_queue_config() -> QueueConfig {
    QueueConfig {
        poll_interval_ms: 10,
        ..Default::default()
    }
}

/// Worker config with short poll and backoff intervals
pub fn fast_worker_config(pool_size: usize) -> WorkerConfig {
    WorkerConfig {
        pool_size,
        poll_interval_ms: 10,
        error_backoff_ms: 50,
        stop_timeout_seconds: 5,
        default_task_timeout_seconds: None,
    }
}

pub fn in_memory_queue() -> Arc<QueueManager> {
    queue_with_registry(Arc::new(InMemoryTaskRegistry::new()))
}

pub fn queue_with_registry(registry: Arc<dyn TaskRegistry>) -> Arc<QueueManager> {
    Arc::new(QueueManager::new(registry, fast_queue_config()))
}

pub struct TestEnv;

impl TestEnv {
    /// Wait for a condition to be true with timeout
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(20)).await;
        }

        condition().await
    }
}
