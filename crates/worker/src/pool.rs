//! Worker池
//!
//! 管理一组编号为 `worker-{n}` 的Worker，支持启动、停止与调整数量。
//! 停止时总等待时间在各Worker之间平均分配。

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use taskq_core::{SchedulerError, SchedulerResult, WorkerConfig};
use taskq_dispatcher::QueueManager;

use crate::worker::{Worker, WorkerStatus};

/// Worker池状态快照
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub running: bool,
    pub pool_size: usize,
    pub active_workers: usize,
    pub busy_workers: usize,
    pub idle_workers: usize,
    pub workers: Vec<WorkerStatus>,
}

struct PoolState {
    workers: Vec<Worker>,
    pool_size: usize,
    next_index: usize,
    running: bool,
}

/// 固定大小的Worker池，所有Worker共享同一个队列管理器
pub struct WorkerPool {
    queue: Arc<QueueManager>,
    config: WorkerConfig,
    state: Mutex<PoolState>,
}

impl WorkerPool {
    pub fn new(queue: Arc<QueueManager>, config: WorkerConfig) -> Self {
        let pool_size = config.pool_size;
        Self {
            queue,
            config,
            state: Mutex::new(PoolState {
                workers: Vec::new(),
                pool_size,
                next_index: 0,
                running: false,
            }),
        }
    }

    pub async fn start(&self, size: usize) -> SchedulerResult<()> {
        if size == 0 {
            return Err(SchedulerError::config_error("Worker池大小必须大于0"));
        }

        let mut state = self.state.lock().await;
        if state.running {
            warn!("Worker池已在运行 (大小: {})", state.pool_size);
            return Ok(());
        }

        state.pool_size = size;
        for _ in 0..size {
            let worker = self.spawn_worker(&mut state).await;
            state.workers.push(worker);
        }
        state.running = true;
        info!("Worker池已启动，共 {} 个Worker", size);
        Ok(())
    }

    /// 停止所有Worker，总等待时间在各Worker之间平均分配
    pub async fn stop(&self, timeout: Duration) {
        let mut state = self.state.lock().await;
        if !state.running {
            return;
        }
        state.running = false;
        let workers = std::mem::take(&mut state.workers);
        drop(state);

        Self::stop_workers(workers, timeout).await;
        info!("Worker池已停止");
    }

    /// 调整Worker数量；池未运行时只记录新的大小
    pub async fn resize(&self, new_size: usize) -> SchedulerResult<()> {
        if new_size == 0 {
            return Err(SchedulerError::config_error("Worker池大小必须大于0"));
        }

        let mut state = self.state.lock().await;
        let old_size = state.pool_size;
        state.pool_size = new_size;
        if !state.running {
            return Ok(());
        }

        let current = state.workers.len();
        if new_size > current {
            for _ in current..new_size {
                let worker = self.spawn_worker(&mut state).await;
                state.workers.push(worker);
            }
        } else if new_size < current {
            let removed = state.workers.split_off(new_size);
            drop(state);
            Self::stop_workers(removed, self.config.stop_timeout()).await;
        }

        info!("Worker池大小由 {} 调整为 {}", old_size, new_size);
        Ok(())
    }

    pub async fn active_workers(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .workers
            .iter()
            .filter(|worker| worker.is_running())
            .map(|worker| worker.worker_id().to_string())
            .collect()
    }

    pub async fn busy_workers(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .workers
            .iter()
            .filter(|worker| worker.is_busy())
            .map(|worker| worker.worker_id().to_string())
            .collect()
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }

    pub async fn status(&self) -> PoolStatus {
        let state = self.state.lock().await;
        let workers: Vec<WorkerStatus> = state.workers.iter().map(Worker::status).collect();
        let active_workers = workers.iter().filter(|w| w.running).count();
        let busy_workers = workers.iter().filter(|w| w.busy).count();
        PoolStatus {
            running: state.running,
            pool_size: state.pool_size,
            active_workers,
            busy_workers,
            idle_workers: active_workers.saturating_sub(busy_workers),
            workers,
        }
    }

    /// 等待所有已就绪的任务执行完毕
    ///
    /// 没有Worker在执行任务且队列中没有就绪任务时返回 true，超时返回 false。
    pub async fn wait_for_completion(&self, timeout: Duration) -> SchedulerResult<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        let poll_interval = self.config.poll_interval();

        loop {
            // 先查就绪任务再查忙碌Worker：Worker在认领任务之前就已标记为忙碌
            if self.queue.ready_count().await? == 0 && self.busy_workers().await.is_empty() {
                return Ok(true);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }

    async fn spawn_worker(&self, state: &mut PoolState) -> Worker {
        let worker_id = format!("worker-{}", state.next_index);
        state.next_index += 1;
        let worker = Worker::new(worker_id, Arc::clone(&self.queue), self.config.clone());
        worker.start().await;
        worker
    }

    async fn stop_workers(workers: Vec<Worker>, timeout: Duration) {
        if workers.is_empty() {
            return;
        }

        // 先通知全部Worker，再逐个等待，避免串行等待正在执行的任务
        for worker in &workers {
            worker.request_stop().await;
        }

        let per_worker = timeout / workers.len() as u32;
        for worker in &workers {
            match worker.join(per_worker).await {
                Ok(true) => {}
                Ok(false) => warn!("Worker {} 未能及时停止，已放弃等待", worker.worker_id()),
                Err(e) => error!("停止Worker {} 失败: {}", worker.worker_id(), e),
            }
        }
    }
}
