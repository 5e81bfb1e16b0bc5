//! Registry wrapper with injectable failures
//!
//! Delegates to an [`InMemoryTaskRegistry`] and fails selected operations
//! so the worker's infrastructure-error paths can be exercised.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use taskq_core::{SchedulerError, SchedulerResult, Task, TaskResult, TaskStatus};
use taskq_dispatcher::{
    InMemoryTaskRegistry, RegistryStatistics, TaskFilter, TaskMutation, TaskRegistry,
};

#[derive(Default)]
pub struct FailingTaskRegistry {
    inner: InMemoryTaskRegistry,
    get_failures: AtomicUsize,
    fail_save_result: AtomicBool,
    failures_injected: AtomicUsize,
}

impl FailingTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` calls to `get` return an error
    pub fn fail_next_gets(&self, count: usize) {
        self.get_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_save_result(&self, fail: bool) {
        self.fail_save_result.store(fail, Ordering::SeqCst);
    }

    /// How many errors have been returned so far
    pub fn failures_injected(&self) -> usize {
        self.failures_injected.load(Ordering::SeqCst)
    }

    fn injected(&self, operation: &str) -> SchedulerError {
        self.failures_injected.fetch_add(1, Ordering::SeqCst);
        SchedulerError::Internal(format!("injected {operation} failure"))
    }
}

#[async_trait]
impl TaskRegistry for FailingTaskRegistry {
    async fn add(&self, task: Task) -> SchedulerResult<()> {
        self.inner.add(task).await
    }

    async fn get(&self, task_id: &str) -> SchedulerResult<Option<Task>> {
        let consumed = self
            .get_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if consumed {
            return Err(self.injected("get"));
        }
        self.inner.get(task_id).await
    }

    async fn remove(&self, task_id: &str) -> SchedulerResult<bool> {
        self.inner.remove(task_id).await
    }

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> SchedulerResult<bool> {
        self.inner.update_status(task_id, status).await
    }

    async fn mutate(
        &self,
        task_id: &str,
        mutation: TaskMutation,
    ) -> SchedulerResult<Option<bool>> {
        self.inner.mutate(task_id, mutation).await
    }

    async fn reset_for_retry(&self, task_id: &str) -> SchedulerResult<bool> {
        self.inner.reset_for_retry(task_id).await
    }

    async fn save_result(&self, result: TaskResult) -> SchedulerResult<()> {
        if self.fail_save_result.load(Ordering::SeqCst) {
            return Err(self.injected("save_result"));
        }
        self.inner.save_result(result).await
    }

    async fn get_result(&self, task_id: &str) -> SchedulerResult<Option<TaskResult>> {
        self.inner.get_result(task_id).await
    }

    async fn remove_result(&self, task_id: &str) -> SchedulerResult<bool> {
        self.inner.remove_result(task_id).await
    }

    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>> {
        self.inner.list(filter).await
    }

    async fn statistics(&self) -> SchedulerResult<RegistryStatistics> {
        self.inner.statistics().await
    }

    async fn ready_count(&self) -> SchedulerResult<usize> {
        self.inner.ready_count().await
    }

    async fn cleanup_older_than(&self, max_age: Duration) -> SchedulerResult<usize> {
        self.inner.cleanup_older_than(max_age).await
    }
}
