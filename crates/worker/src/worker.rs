//! 单个Worker
//!
//! 每个Worker是一个tokio任务，循环地从队列取出就绪任务并执行，
//! 同一时刻最多执行一个任务。

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use metrics::{counter, histogram};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use taskq_core::traits::panic_message;
use taskq_core::{SchedulerError, SchedulerResult, Task, TaskResult, WorkerConfig};
use taskq_dispatcher::{QueueManager, TaskRegistry};

/// Worker状态快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub running: bool,
    pub busy: bool,
    pub current_task: Option<String>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
}

struct WorkerInner {
    worker_id: String,
    queue: Arc<QueueManager>,
    registry: Arc<dyn TaskRegistry>,
    config: WorkerConfig,
    running: AtomicBool,
    generation: AtomicU64,
    current_task: StdRwLock<Option<String>>,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
}

struct WorkerRuntime {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// 在任务执行的每条路径上清空当前任务
struct CurrentTaskGuard<'a> {
    slot: &'a StdRwLock<Option<String>>,
}

impl<'a> CurrentTaskGuard<'a> {
    fn set(slot: &'a StdRwLock<Option<String>>, task_id: &str) -> Self {
        *slot.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(task_id.to_string());
        Self { slot }
    }
}

impl Drop for CurrentTaskGuard<'_> {
    fn drop(&mut self) {
        *self
            .slot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }
}

pub struct Worker {
    inner: Arc<WorkerInner>,
    runtime: Mutex<Option<WorkerRuntime>>,
}

impl Worker {
    pub fn new(worker_id: impl Into<String>, queue: Arc<QueueManager>, config: WorkerConfig) -> Self {
        let registry = queue.registry();
        Self {
            inner: Arc::new(WorkerInner {
                worker_id: worker_id.into(),
                queue,
                registry,
                config,
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                current_task: StdRwLock::new(None),
                tasks_completed: AtomicU64::new(0),
                tasks_failed: AtomicU64::new(0),
            }),
            runtime: Mutex::new(None),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.inner.worker_id
    }

    /// 启动执行循环，已在运行时只记录警告
    pub async fn start(&self) {
        let mut runtime = self.runtime.lock().await;
        if let Some(existing) = runtime.as_ref() {
            if !existing.handle.is_finished() {
                warn!("Worker {} 已在运行", self.inner.worker_id);
                return;
            }
        }

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.running.store(true, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            inner.run(generation, shutdown_rx).await;
        });

        *runtime = Some(WorkerRuntime {
            shutdown_tx,
            handle,
        });
        info!("Worker {} 已启动", self.inner.worker_id);
    }

    /// 发出停止信号，不等待循环退出
    pub async fn request_stop(&self) {
        if let Some(runtime) = self.runtime.lock().await.as_ref() {
            let _ = runtime.shutdown_tx.send(());
        }
    }

    /// 等待执行循环退出，超时后放弃等待
    ///
    /// 返回循环是否在限定时间内退出。超时的循环仍保留句柄，
    /// 在它退出之前 `start()` 不会启动新的循环。
    pub async fn join(&self, timeout: Duration) -> SchedulerResult<bool> {
        let mut runtime = self.runtime.lock().await;
        let Some(current) = runtime.as_mut() else {
            return Ok(true);
        };

        match tokio::time::timeout(timeout, &mut current.handle).await {
            Ok(Ok(())) => {
                *runtime = None;
                info!("Worker {} 已停止", self.inner.worker_id);
                Ok(true)
            }
            Ok(Err(e)) => {
                *runtime = None;
                Err(SchedulerError::worker_error(format!(
                    "Worker {} 执行循环异常退出: {e}",
                    self.inner.worker_id
                )))
            }
            Err(_) => {
                warn!(
                    "Worker {} 未能在 {:?} 内停止，当前任务: {:?}",
                    self.inner.worker_id,
                    timeout,
                    self.current_task()
                );
                Ok(false)
            }
        }
    }

    /// 停止Worker，正在执行的任务会先执行完
    pub async fn stop(&self, timeout: Duration) -> SchedulerResult<bool> {
        self.request_stop().await;
        self.join(timeout).await
    }

    /// 在当前Worker上执行一个已出队的任务
    ///
    /// 任务已被取消或被其他Worker认领时返回 `Ok(None)`。
    /// 处理函数的错误、panic和超时都会记录为结果，不会作为错误返回。
    pub async fn execute(&self, task: Task) -> SchedulerResult<Option<TaskResult>> {
        self.inner.execute(task).await
    }

    pub fn current_task(&self) -> Option<String> {
        self.inner.current_task()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn is_busy(&self) -> bool {
        self.current_task().is_some()
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            worker_id: self.inner.worker_id.clone(),
            running: self.is_running(),
            busy: self.is_busy(),
            current_task: self.current_task(),
            tasks_completed: self.inner.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.inner.tasks_failed.load(Ordering::Relaxed),
        }
    }
}

impl WorkerInner {
    fn current_task(&self) -> Option<String> {
        self.current_task
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn run(&self, generation: u64, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!("Worker {} 执行循环开始", self.worker_id);

        loop {
            match shutdown_rx.try_recv() {
                Err(TryRecvError::Empty) => {}
                _ => break,
            }

            let delay = match self.poll_once().await {
                Ok(true) => continue,
                Ok(false) => self.config.poll_interval(),
                Err(e) => {
                    error!("Worker {} 出错: {}", self.worker_id, e);
                    self.config.error_backoff()
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.recv() => break,
            }
        }

        // 只有最新一轮的循环才能清除运行标记
        if self.generation.load(Ordering::SeqCst) == generation {
            self.running.store(false, Ordering::SeqCst);
        }
        debug!("Worker {} 执行循环结束", self.worker_id);
    }

    /// 取一个任务执行，返回是否执行了任务
    async fn poll_once(&self) -> SchedulerResult<bool> {
        match self.queue.next_ready().await? {
            Some(task) => {
                self.execute(task).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn execute(&self, task: Task) -> SchedulerResult<Option<TaskResult>> {
        let task_id = task.task_id.clone();
        // 认领之前先登记当前任务，避免外部观察到既不在队列也不在执行中的间隙
        let _guard = CurrentTaskGuard::set(&self.current_task, &task_id);

        match self.registry.mark_running(&task_id, &self.worker_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("任务 {} 已被取消或认领，跳过", task_id);
                return Ok(None);
            }
            Err(e) => {
                if let Err(requeue_err) = self.queue.requeue(&task_id).await {
                    error!("任务 {} 重新入队失败: {}", task_id, requeue_err);
                }
                return Err(SchedulerError::worker_error(format!(
                    "认领任务 {task_id} 失败: {e}"
                )));
            }
        }

        info!(
            "Worker {} 开始执行任务 {} (处理器: {})",
            self.worker_id,
            task_id,
            task.handler_name()
        );

        let result = self.run_handler(&task).await;
        let status = result.status;

        histogram!("taskq_task_execution_seconds").record(result.execution_time);
        if result.is_success() {
            self.tasks_completed.fetch_add(1, Ordering::Relaxed);
            counter!("taskq_tasks_completed_total").increment(1);
            info!(
                "任务 {} 执行成功，耗时 {:.3}s",
                task_id, result.execution_time
            );
        } else {
            self.tasks_failed.fetch_add(1, Ordering::Relaxed);
            match status {
                taskq_core::TaskStatus::Timeout => {
                    counter!("taskq_tasks_timeout_total").increment(1)
                }
                _ => counter!("taskq_tasks_failed_total").increment(1),
            }
            warn!(
                "任务 {} 执行失败 (状态: {}): {}",
                task_id,
                status,
                result.error.as_deref().unwrap_or_default()
            );
        }

        if let Err(e) = self.registry.save_result(result.clone()).await {
            if let Err(finish_err) = self
                .registry
                .finish(&task_id, taskq_core::TaskStatus::Failed)
                .await
            {
                error!("任务 {} 状态更新失败: {}", task_id, finish_err);
            }
            return Err(SchedulerError::worker_error(format!(
                "保存任务 {task_id} 的结果失败: {e}"
            )));
        }

        self.registry
            .finish(&task_id, status)
            .await
            .map_err(|e| {
                SchedulerError::worker_error(format!("更新任务 {task_id} 状态失败: {e}"))
            })?;

        Ok(Some(result))
    }

    async fn run_handler(&self, task: &Task) -> TaskResult {
        let context = task.context(&self.worker_id);
        let timeout = task.timeout.or_else(|| self.config.default_task_timeout());
        let mut metadata = task.metadata.clone();
        metadata.insert("worker_id".to_string(), json!(self.worker_id));
        metadata.insert("retry_count".to_string(), json!(task.retry_count));

        let handler = Arc::clone(&task.handler);
        let execution = AssertUnwindSafe(handler.execute(context)).catch_unwind();
        let start_time = Utc::now();

        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, execution).await.ok(),
            None => Some(execution.await),
        };
        let end_time = Utc::now();

        match outcome {
            Some(Ok(Ok(value))) => {
                TaskResult::success(&task.task_id, value, start_time, end_time, metadata)
            }
            Some(Ok(Err(e))) => {
                TaskResult::failure(&task.task_id, format!("{e:#}"), start_time, end_time, metadata)
            }
            Some(Err(payload)) => TaskResult::failure(
                &task.task_id,
                format!("handler panicked: {}", panic_message(payload.as_ref())),
                start_time,
                end_time,
                metadata,
            ),
            None => TaskResult::timeout(
                &task.task_id,
                format!("任务执行超时 ({:?})", timeout.unwrap_or_default()),
                start_time,
                end_time,
                metadata,
            ),
        }
    }
}
