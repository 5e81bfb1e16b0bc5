use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use taskq_core::{blocking_handler, AppConfig, TaskHandler, TaskPriority, TaskSubmission};
use taskq_dispatcher::{InMemoryTaskRegistry, QueueManager, QueueStatus, TaskRegistry};
use taskq_worker::{PoolStatus, WorkerPool};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// 主应用程序
///
/// 组装注册表、队列管理器与Worker池，三者之间通过 `Arc` 共享。
pub struct Application {
    config: AppConfig,
    registry: Arc<dyn TaskRegistry>,
    queue: Arc<QueueManager>,
    pool: Arc<WorkerPool>,
}

impl Application {
    pub fn new(config: AppConfig) -> Self {
        let registry: Arc<dyn TaskRegistry> = Arc::new(InMemoryTaskRegistry::new());
        Self::with_registry(config, registry)
    }

    /// 使用指定的注册表实现创建应用
    pub fn with_registry(config: AppConfig, registry: Arc<dyn TaskRegistry>) -> Self {
        let queue = Arc::new(QueueManager::new(
            Arc::clone(&registry),
            config.queue.clone(),
        ));
        let pool = Arc::new(WorkerPool::new(Arc::clone(&queue), config.worker.clone()));

        Self {
            config,
            registry,
            queue,
            pool,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<dyn TaskRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn queue(&self) -> Arc<QueueManager> {
        Arc::clone(&self.queue)
    }

    pub fn pool(&self) -> Arc<WorkerPool> {
        Arc::clone(&self.pool)
    }

    /// 启动队列维护循环与Worker池
    pub async fn start(&self) -> Result<()> {
        info!(
            "启动任务队列 (容量: {}, Worker数量: {})",
            self.config.queue.max_queue_size, self.config.worker.pool_size
        );
        self.queue.start().await;
        self.pool
            .start(self.config.worker.pool_size)
            .await
            .context("启动Worker池失败")?;
        Ok(())
    }

    /// 停止Worker池与维护循环；Worker会先完成正在执行的任务
    pub async fn stop(&self) {
        info!("停止任务队列");
        self.pool.stop(self.config.worker.stop_timeout()).await;
        self.queue.stop().await;
    }

    /// 启动后一直运行到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.start().await?;

        if let Err(e) = shutdown_rx.recv().await {
            warn!("关闭信号通道异常: {}", e);
        }

        self.stop().await;
        Ok(())
    }

    pub async fn status(&self) -> Result<(QueueStatus, PoolStatus)> {
        let queue_status = self.queue.snapshot().await.context("获取队列状态失败")?;
        let pool_status = self.pool.status().await;
        Ok((queue_status, pool_status))
    }

    /// 提交若干演示任务，优先级轮流分配
    pub async fn submit_demo_tasks(&self, count: usize) -> Result<Vec<String>> {
        let handler = demo_handler();
        let priorities = [
            TaskPriority::Low,
            TaskPriority::Normal,
            TaskPriority::High,
            TaskPriority::Urgent,
        ];

        let mut task_ids = Vec::with_capacity(count);
        for i in 0..count {
            let submission = TaskSubmission::new(Arc::clone(&handler))
                .with_arg(json!(10_000 * (i + 1)))
                .with_priority(priorities[i % priorities.len()])
                .with_metadata("demo", json!(true));
            let task_id = self
                .queue
                .submit(submission)
                .await
                .with_context(|| format!("提交第 {} 个演示任务失败", i + 1))?;
            task_ids.push(task_id);
        }

        info!("已提交 {} 个演示任务", count);
        Ok(task_ids)
    }
}

/// 计算 0..n 的平方和，在阻塞线程池中执行
pub fn demo_handler() -> Arc<dyn TaskHandler> {
    blocking_handler("sum_of_squares", |ctx| {
        let n = ctx
            .arg_i64(0)
            .ok_or_else(|| anyhow::anyhow!("缺少参数 n"))?;
        if n < 0 {
            anyhow::bail!("参数 n 不能为负数: {n}");
        }
        let sum: i128 = (0..n as i128).map(|i| i * i).sum();
        Ok(json!({ "n": n, "sum": sum.to_string() }))
    })
}
