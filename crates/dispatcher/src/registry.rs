//! 任务注册表
//!
//! 保存所有已知任务及其执行结果，是任务状态的唯一来源。
//! 队列管理器与Worker都只通过 [`TaskRegistry`] 读写任务。

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use taskq_core::{
    SchedulerError, SchedulerResult, Task, TaskPriority, TaskResult, TaskStatus,
};

/// 在注册表锁内对任务执行的修改，返回修改是否生效
pub type TaskMutation = Box<dyn FnOnce(&mut Task) -> bool + Send>;

/// 任务查询过滤条件
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub limit: Option<usize>,
}

impl TaskFilter {
    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_priority(priority: TaskPriority) -> Self {
        Self {
            priority: Some(priority),
            ..Default::default()
        }
    }

    fn matches(&self, task: &Task) -> bool {
        self.status.map_or(true, |status| task.status == status)
            && self.priority.map_or(true, |priority| task.priority == priority)
    }
}

/// 注册表统计信息
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistryStatistics {
    pub total_tasks: usize,
    pub total_results: usize,
    pub by_status: BTreeMap<TaskStatus, usize>,
    pub by_priority: BTreeMap<TaskPriority, usize>,
}

impl RegistryStatistics {
    pub fn count(&self, status: TaskStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

#[async_trait]
pub trait TaskRegistry: Send + Sync {
    /// 登记新任务，ID重复时返回 `DuplicateTask`
    async fn add(&self, task: Task) -> SchedulerResult<()>;

    async fn get(&self, task_id: &str) -> SchedulerResult<Option<Task>>;

    /// 删除任务及其结果，任务不存在时返回 false
    async fn remove(&self, task_id: &str) -> SchedulerResult<bool>;

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> SchedulerResult<bool>;

    /// 在锁内修改任务；任务不存在时返回 `None`
    async fn mutate(&self, task_id: &str, mutation: TaskMutation)
        -> SchedulerResult<Option<bool>>;

    /// PENDING -> RUNNING 的比较并设置，任务已被取消或被其他Worker认领时返回 false
    async fn mark_running(&self, task_id: &str, worker_id: &str) -> SchedulerResult<bool> {
        let worker_id = worker_id.to_string();
        let claimed = self
            .mutate(task_id, Box::new(move |task| task.start(&worker_id)))
            .await?;
        Ok(claimed.unwrap_or(false))
    }

    /// RUNNING -> 终止状态
    async fn finish(&self, task_id: &str, status: TaskStatus) -> SchedulerResult<bool> {
        let finished = self
            .mutate(task_id, Box::new(move |task| task.finish(status)))
            .await?;
        Ok(finished.unwrap_or(false))
    }

    /// FAILED -> PENDING 并在同一把锁内删除上一次的结果
    async fn reset_for_retry(&self, task_id: &str) -> SchedulerResult<bool>;

    /// 保存执行结果，同一任务的旧结果会被覆盖
    async fn save_result(&self, result: TaskResult) -> SchedulerResult<()>;

    async fn get_result(&self, task_id: &str) -> SchedulerResult<Option<TaskResult>>;

    async fn remove_result(&self, task_id: &str) -> SchedulerResult<bool>;

    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>>;

    async fn statistics(&self) -> SchedulerResult<RegistryStatistics>;

    /// 已到执行时间的PENDING任务数量
    async fn ready_count(&self) -> SchedulerResult<usize>;

    /// 删除创建时间早于 `max_age` 且已处于终止状态的任务，返回删除数量
    async fn cleanup_older_than(&self, max_age: Duration) -> SchedulerResult<usize>;
}

#[derive(Default)]
struct RegistryState {
    tasks: HashMap<String, Task>,
    results: HashMap<String, TaskResult>,
}

/// 基于内存的注册表实现
///
/// 任务与结果放在同一把读写锁下，统计信息在锁内一次性计算。
#[derive(Default)]
pub struct InMemoryTaskRegistry {
    state: RwLock<RegistryState>,
}

impl InMemoryTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRegistry for InMemoryTaskRegistry {
    async fn add(&self, task: Task) -> SchedulerResult<()> {
        let mut state = self.state.write().await;
        if state.tasks.contains_key(&task.task_id) {
            return Err(SchedulerError::duplicate_task(task.task_id));
        }
        debug!("登记任务 {} (优先级: {})", task.task_id, task.priority);
        state.tasks.insert(task.task_id.clone(), task);
        Ok(())
    }

    async fn get(&self, task_id: &str) -> SchedulerResult<Option<Task>> {
        let state = self.state.read().await;
        Ok(state.tasks.get(task_id).cloned())
    }

    async fn remove(&self, task_id: &str) -> SchedulerResult<bool> {
        let mut state = self.state.write().await;
        state.results.remove(task_id);
        Ok(state.tasks.remove(task_id).is_some())
    }

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> SchedulerResult<bool> {
        let mut state = self.state.write().await;
        match state.tasks.get_mut(task_id) {
            Some(task) => {
                task.status = status;
                if status.is_terminal() {
                    task.completed_at = Some(Utc::now());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mutate(
        &self,
        task_id: &str,
        mutation: TaskMutation,
    ) -> SchedulerResult<Option<bool>> {
        let mut state = self.state.write().await;
        Ok(state.tasks.get_mut(task_id).map(mutation))
    }

    async fn reset_for_retry(&self, task_id: &str) -> SchedulerResult<bool> {
        let mut state = self.state.write().await;
        let reset = state
            .tasks
            .get_mut(task_id)
            .is_some_and(|task| task.reset_for_retry());
        if reset {
            state.results.remove(task_id);
        }
        Ok(reset)
    }

    async fn save_result(&self, result: TaskResult) -> SchedulerResult<()> {
        let mut state = self.state.write().await;
        state.results.insert(result.task_id.clone(), result);
        Ok(())
    }

    async fn get_result(&self, task_id: &str) -> SchedulerResult<Option<TaskResult>> {
        let state = self.state.read().await;
        Ok(state.results.get(task_id).cloned())
    }

    async fn remove_result(&self, task_id: &str) -> SchedulerResult<bool> {
        let mut state = self.state.write().await;
        Ok(state.results.remove(task_id).is_some())
    }

    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>> {
        let state = self.state.read().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|task| filter.matches(task))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        if let Some(limit) = filter.limit {
            tasks.truncate(limit);
        }
        Ok(tasks)
    }

    async fn statistics(&self) -> SchedulerResult<RegistryStatistics> {
        let state = self.state.read().await;
        let mut stats = RegistryStatistics {
            total_tasks: state.tasks.len(),
            total_results: state.results.len(),
            ..Default::default()
        };
        for task in state.tasks.values() {
            *stats.by_status.entry(task.status).or_insert(0) += 1;
            *stats.by_priority.entry(task.priority).or_insert(0) += 1;
        }
        Ok(stats)
    }

    async fn ready_count(&self) -> SchedulerResult<usize> {
        let state = self.state.read().await;
        let now = Utc::now();
        Ok(state
            .tasks
            .values()
            .filter(|task| task.is_ready_at(now))
            .count())
    }

    async fn cleanup_older_than(&self, max_age: Duration) -> SchedulerResult<usize> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| SchedulerError::Internal(format!("清理时间范围无效: {e}")))?;
        let cutoff = Utc::now() - max_age;

        let mut state = self.state.write().await;
        let expired: Vec<String> = state
            .tasks
            .values()
            .filter(|task| task.status.is_terminal() && task.created_at < cutoff)
            .map(|task| task.task_id.clone())
            .collect();

        for task_id in &expired {
            state.tasks.remove(task_id);
            state.results.remove(task_id);
        }
        Ok(expired.len())
    }
}
