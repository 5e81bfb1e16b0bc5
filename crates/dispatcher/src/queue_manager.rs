//! 优先级队列管理
//!
//! 待调度任务按 (优先级降序, 创建时间升序, 提交序号升序) 排在一个二叉堆中。
//! 堆只保存任务ID，任务本身的状态以注册表为准：出堆时发现任务已被删除或
//! 不再是PENDING，则直接丢弃该条目。
//!
//! 注意：`next_ready` 只检查堆顶。堆顶任务尚未到执行时间时会被放回并返回
//! `None`，即使堆中更低优先级的任务已经就绪（队头阻塞）。

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use taskq_core::{
    QueueConfig, SchedulerError, SchedulerResult, Task, TaskPriority, TaskResult, TaskStatus,
    TaskSubmission,
};

use crate::registry::{RegistryStatistics, TaskFilter, TaskRegistry};

const MAINTENANCE_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// 堆中的条目
#[derive(Debug, Clone, PartialEq, Eq)]
struct QueueEntry {
    priority: TaskPriority,
    created_at: DateTime<Utc>,
    sequence: u64,
    task_id: String,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap是大顶堆：优先级高的在前，同优先级时先创建、先提交的在前
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.created_at.cmp(&self.created_at))
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<QueueEntry>,
    next_sequence: u64,
}

impl QueueState {
    fn push(&mut self, task: &Task) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(QueueEntry {
            priority: task.priority,
            created_at: task.created_at,
            sequence,
            task_id: task.task_id.clone(),
        });
    }
}

struct MaintenanceHandle {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// 队列状态快照
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub queue_size: usize,
    pub max_queue_size: usize,
    pub running: bool,
    pub statistics: RegistryStatistics,
}

pub struct QueueManager {
    registry: Arc<dyn TaskRegistry>,
    config: QueueConfig,
    state: Mutex<QueueState>,
    maintenance: Mutex<Option<MaintenanceHandle>>,
}

impl QueueManager {
    pub fn new(registry: Arc<dyn TaskRegistry>, config: QueueConfig) -> Self {
        Self {
            registry,
            config,
            state: Mutex::new(QueueState::default()),
            maintenance: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> Arc<dyn TaskRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// 提交任务，返回任务ID
    pub async fn submit(&self, submission: TaskSubmission) -> SchedulerResult<String> {
        let mut state = self.state.lock().await;
        if state.heap.len() >= self.config.max_queue_size {
            counter!("taskq_tasks_rejected_total").increment(1);
            warn!(
                "队列已满，拒绝提交任务 (容量: {})",
                self.config.max_queue_size
            );
            return Err(SchedulerError::QueueFull {
                capacity: self.config.max_queue_size,
            });
        }

        let task = submission.into_task(self.config.default_max_retries);
        let task_id = task.task_id.clone();
        state.push(&task);
        let priority = task.priority;
        let handler = task.handler_name().to_string();

        if let Err(e) = self.registry.add(task).await {
            state.heap.retain(|entry| entry.task_id != task_id);
            return Err(e);
        }

        counter!("taskq_tasks_submitted_total").increment(1);
        gauge!("taskq_queue_size").set(state.heap.len() as f64);
        info!(
            "任务 {} 已提交 (处理器: {}, 优先级: {})",
            task_id, handler, priority
        );
        Ok(task_id)
    }

    /// 取出下一个可执行的任务
    ///
    /// 返回的是任务快照，调用方仍需通过注册表的 `mark_running` 认领任务。
    pub async fn next_ready(&self) -> SchedulerResult<Option<Task>> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        while let Some(entry) = state.heap.pop() {
            let task = match self.registry.get(&entry.task_id).await {
                Ok(task) => task,
                Err(e) => {
                    state.heap.push(entry);
                    return Err(e);
                }
            };

            match task {
                Some(task) if task.status == TaskStatus::Pending => {
                    if task.is_ready_at(now) {
                        gauge!("taskq_queue_size").set(state.heap.len() as f64);
                        debug!("任务 {} 出队", task.task_id);
                        return Ok(Some(task));
                    }
                    state.heap.push(entry);
                    return Ok(None);
                }
                Some(task) => {
                    debug!("丢弃状态为 {} 的任务条目 {}", task.status, entry.task_id);
                }
                None => {
                    debug!("丢弃已删除任务的条目 {}", entry.task_id);
                }
            }
        }

        Ok(None)
    }

    /// 把认领失败但仍处于PENDING的任务放回队列
    pub async fn requeue(&self, task_id: &str) -> SchedulerResult<bool> {
        let mut state = self.state.lock().await;
        if state.heap.iter().any(|entry| entry.task_id == task_id) {
            return Ok(false);
        }
        match self.registry.get(task_id).await? {
            Some(task) if task.status == TaskStatus::Pending => {
                state.push(&task);
                debug!("任务 {} 重新入队", task_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// 取消PENDING任务
    pub async fn cancel(&self, task_id: &str) -> SchedulerResult<bool> {
        let mut state = self.state.lock().await;
        let Some(task) = self.registry.get(task_id).await? else {
            warn!("取消失败，任务不存在: {}", task_id);
            return Ok(false);
        };

        if task.status != TaskStatus::Pending {
            warn!("任务 {} 当前状态为 {}，无法取消", task_id, task.status);
            return Ok(false);
        }

        let cancelled = self
            .registry
            .mutate(task_id, Box::new(|task| task.cancel()))
            .await?
            .unwrap_or(false);
        if !cancelled {
            warn!("任务 {} 已被Worker认领，无法取消", task_id);
            return Ok(false);
        }

        state.heap.retain(|entry| entry.task_id != task_id);
        counter!("taskq_tasks_cancelled_total").increment(1);
        gauge!("taskq_queue_size").set(state.heap.len() as f64);
        info!("任务 {} 已取消", task_id);
        Ok(true)
    }

    /// 重试FAILED任务
    pub async fn retry(&self, task_id: &str) -> SchedulerResult<bool> {
        let mut state = self.state.lock().await;
        let Some(task) = self.registry.get(task_id).await? else {
            warn!("重试失败，任务不存在: {}", task_id);
            return Ok(false);
        };

        if !task.can_retry() {
            warn!(
                "任务 {} 不可重试 (状态: {}, 已重试: {}/{})",
                task_id, task.status, task.retry_count, task.max_retries
            );
            return Ok(false);
        }

        if !self.registry.reset_for_retry(task_id).await? {
            return Ok(false);
        }

        state.push(&task);
        counter!("taskq_tasks_retried_total").increment(1);
        gauge!("taskq_queue_size").set(state.heap.len() as f64);
        info!(
            "任务 {} 已重新入队 (第 {} 次重试)",
            task_id,
            task.retry_count + 1
        );
        Ok(true)
    }

    /// 任务状态，`None` 表示任务不存在
    pub async fn status_of(&self, task_id: &str) -> SchedulerResult<Option<TaskStatus>> {
        Ok(self.registry.get(task_id).await?.map(|task| task.status))
    }

    pub async fn result_of(&self, task_id: &str) -> SchedulerResult<Option<TaskResult>> {
        self.registry.get_result(task_id).await
    }

    pub async fn task(&self, task_id: &str) -> SchedulerResult<Option<Task>> {
        self.registry.get(task_id).await
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>> {
        self.registry.list(filter).await
    }

    /// 等待任务结果
    ///
    /// 在结果出现、任务被删除、任务结束但没有结果（例如被取消）或超时后返回。
    /// `timeout` 为 `None` 时一直等待。
    pub async fn wait(
        &self,
        task_id: &str,
        timeout: Option<Duration>,
    ) -> SchedulerResult<Option<TaskResult>> {
        let deadline = timeout.map(|timeout| tokio::time::Instant::now() + timeout);

        loop {
            if let Some(result) = self.registry.get_result(task_id).await? {
                return Ok(Some(result));
            }

            match self.registry.get(task_id).await? {
                None => return Ok(None),
                Some(task) if task.is_finished() => {
                    // 保存结果与更新状态之间可能有间隙，再确认一次
                    return self.registry.get_result(task_id).await;
                }
                Some(_) => {}
            }

            let sleep_for = match deadline {
                Some(deadline) => {
                    let now = tokio::time::Instant::now();
                    if now >= deadline {
                        debug!("等待任务 {} 超时", task_id);
                        return Ok(None);
                    }
                    self.config.poll_interval().min(deadline - now)
                }
                None => self.config.poll_interval(),
            };
            tokio::time::sleep(sleep_for).await;
        }
    }

    /// 堆中的条目数
    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.heap.len()
    }

    /// 已到执行时间的PENDING任务数
    pub async fn ready_count(&self) -> SchedulerResult<usize> {
        self.registry.ready_count().await
    }

    pub async fn is_running(&self) -> bool {
        self.maintenance.lock().await.is_some()
    }

    pub async fn snapshot(&self) -> SchedulerResult<QueueStatus> {
        let queue_size = self.pending_count().await;
        let running = self.is_running().await;
        let statistics = self.registry.statistics().await?;
        Ok(QueueStatus {
            queue_size,
            max_queue_size: self.config.max_queue_size,
            running,
            statistics,
        })
    }

    /// 启动后台维护循环，定期清理过期的已结束任务
    pub async fn start(&self) {
        let mut maintenance = self.maintenance.lock().await;
        if maintenance.is_some() {
            warn!("队列维护循环已在运行");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let registry = Arc::clone(&self.registry);
        let interval = self.config.maintenance_interval();
        let max_age = self.config.cleanup_max_age();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // 第一次tick立即返回，跳过
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match registry.cleanup_older_than(max_age).await {
                            Ok(0) => {}
                            Ok(removed) => info!("清理了 {} 个过期任务", removed),
                            Err(e) => error!("清理过期任务失败: {}", e),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("队列维护循环收到停止信号");
                        break;
                    }
                }
            }
        });

        *maintenance = Some(MaintenanceHandle {
            shutdown_tx,
            handle,
        });
        info!("队列管理器已启动");
    }

    /// 停止后台维护循环
    pub async fn stop(&self) {
        let Some(MaintenanceHandle {
            shutdown_tx,
            mut handle,
        }) = self.maintenance.lock().await.take()
        else {
            return;
        };

        let _ = shutdown_tx.send(());
        match tokio::time::timeout(MAINTENANCE_STOP_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => info!("队列管理器已停止"),
            Ok(Err(e)) => error!("队列维护循环异常退出: {}", e),
            Err(_) => {
                warn!("队列维护循环未能在限定时间内停止");
                handle.abort();
            }
        }
    }

    /// 停止维护循环并清空队列，注册表中的任务保持不变
    pub async fn cleanup(&self) {
        self.stop().await;
        let mut state = self.state.lock().await;
        state.heap.clear();
        gauge!("taskq_queue_size").set(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryTaskRegistry;
    use serde_json::json;
    use taskq_core::handler_fn;

    fn manager_with(config: QueueConfig) -> QueueManager {
        QueueManager::new(Arc::new(InMemoryTaskRegistry::new()), config)
    }

    fn submission(priority: TaskPriority) -> TaskSubmission {
        TaskSubmission::new(handler_fn("noop", |_ctx| async { Ok(json!(null)) }))
            .with_priority(priority)
    }

    #[test]
    fn test_entry_ordering() {
        let now = Utc::now();
        let entry = |priority, offset_ms: i64, sequence| QueueEntry {
            priority,
            created_at: now + chrono::Duration::milliseconds(offset_ms),
            sequence,
            task_id: format!("t{sequence}"),
        };

        let mut heap = BinaryHeap::new();
        heap.push(entry(TaskPriority::Low, 0, 0));
        heap.push(entry(TaskPriority::Urgent, 10, 1));
        heap.push(entry(TaskPriority::Normal, 5, 2));
        heap.push(entry(TaskPriority::Normal, 5, 3));
        heap.push(entry(TaskPriority::Normal, 1, 4));

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|e| e.sequence)).collect();
        assert_eq!(order, vec![1, 4, 2, 3, 0]);
    }

    #[tokio::test]
    async fn test_submit_respects_capacity() {
        let manager = manager_with(QueueConfig {
            max_queue_size: 2,
            ..Default::default()
        });

        manager.submit(submission(TaskPriority::Normal)).await.unwrap();
        manager.submit(submission(TaskPriority::Normal)).await.unwrap();
        let err = manager
            .submit(submission(TaskPriority::Normal))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::QueueFull { capacity: 2 }));

        // 出队后腾出空间
        assert!(manager.next_ready().await.unwrap().is_some());
        assert!(manager.submit(submission(TaskPriority::Normal)).await.is_ok());
    }

    #[tokio::test]
    async fn test_submit_uses_default_max_retries() {
        let manager = manager_with(QueueConfig {
            default_max_retries: 7,
            ..Default::default()
        });
        let task_id = manager.submit(submission(TaskPriority::Low)).await.unwrap();
        let task = manager.task(&task_id).await.unwrap().unwrap();
        assert_eq!(task.max_retries, 7);
        assert_eq!(manager.status_of(&task_id).await.unwrap(), Some(TaskStatus::Pending));
        assert_eq!(manager.status_of("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_next_ready_discards_stale_entries() {
        let manager = manager_with(QueueConfig::default());
        let removed = manager.submit(submission(TaskPriority::Urgent)).await.unwrap();
        let kept = manager.submit(submission(TaskPriority::Low)).await.unwrap();

        manager.registry().remove(&removed).await.unwrap();

        let task = manager.next_ready().await.unwrap().unwrap();
        assert_eq!(task.task_id, kept);
        assert!(manager.next_ready().await.unwrap().is_none());
        assert_eq!(manager.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_future_head_blocks_queue() {
        let manager = manager_with(QueueConfig::default());
        manager
            .submit(submission(TaskPriority::Urgent).with_delay(Duration::from_secs(60)))
            .await
            .unwrap();
        manager.submit(submission(TaskPriority::Low)).await.unwrap();

        assert!(manager.next_ready().await.unwrap().is_none());
        assert_eq!(manager.pending_count().await, 2);
        assert_eq!(manager.ready_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancel_pending_task() {
        let manager = manager_with(QueueConfig::default());
        let task_id = manager.submit(submission(TaskPriority::Normal)).await.unwrap();

        assert!(manager.cancel(&task_id).await.unwrap());
        assert_eq!(manager.status_of(&task_id).await.unwrap(), Some(TaskStatus::Cancelled));
        assert_eq!(manager.pending_count().await, 0);
        assert!(!manager.cancel(&task_id).await.unwrap());
        assert!(!manager.cancel("missing").await.unwrap());
        assert!(manager.next_ready().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_running_task_refused() {
        let manager = manager_with(QueueConfig::default());
        let task_id = manager.submit(submission(TaskPriority::Normal)).await.unwrap();
        let task = manager.next_ready().await.unwrap().unwrap();
        assert!(manager
            .registry()
            .mark_running(&task.task_id, "worker-0")
            .await
            .unwrap());

        assert!(!manager.cancel(&task_id).await.unwrap());
        assert_eq!(manager.status_of(&task_id).await.unwrap(), Some(TaskStatus::Running));
    }

    #[tokio::test]
    async fn test_retry_resets_task_and_clears_result() {
        let manager = manager_with(QueueConfig::default());
        let task_id = manager
            .submit(submission(TaskPriority::Normal).with_max_retries(1))
            .await
            .unwrap();
        let registry = manager.registry();

        // 未失败的任务不能重试
        assert!(!manager.retry(&task_id).await.unwrap());

        manager.next_ready().await.unwrap().unwrap();
        registry.mark_running(&task_id, "worker-0").await.unwrap();
        let now = Utc::now();
        registry
            .save_result(TaskResult::failure(&task_id, "boom", now, now, Default::default()))
            .await
            .unwrap();
        registry.finish(&task_id, TaskStatus::Failed).await.unwrap();

        assert!(manager.retry(&task_id).await.unwrap());
        let task = manager.task(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);
        assert!(task.worker_id.is_none());
        assert!(manager.result_of(&task_id).await.unwrap().is_none());
        assert_eq!(manager.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_wait_returns_none_for_cancelled_and_unknown() {
        let manager = manager_with(QueueConfig::default());
        let task_id = manager.submit(submission(TaskPriority::Normal)).await.unwrap();
        manager.cancel(&task_id).await.unwrap();

        assert!(manager
            .wait(&task_id, Some(Duration::from_secs(1)))
            .await
            .unwrap()
            .is_none());
        assert!(manager.wait("missing", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let manager = manager_with(QueueConfig {
            poll_interval_ms: 10,
            ..Default::default()
        });
        let task_id = manager.submit(submission(TaskPriority::Normal)).await.unwrap();

        let started = std::time::Instant::now();
        let result = manager
            .wait(&task_id, Some(Duration::from_millis(100)))
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_snapshot_and_lifecycle() {
        let manager = manager_with(QueueConfig::default());
        manager.submit(submission(TaskPriority::High)).await.unwrap();

        manager.start().await;
        manager.start().await;
        let status = manager.snapshot().await.unwrap();
        assert!(status.running);
        assert_eq!(status.queue_size, 1);
        assert_eq!(status.max_queue_size, 1000);
        assert_eq!(status.statistics.total_tasks, 1);

        manager.cleanup().await;
        let status = manager.snapshot().await.unwrap();
        assert!(!status.running);
        assert_eq!(status.queue_size, 0);
        assert_eq!(status.statistics.total_tasks, 1);
    }
}
