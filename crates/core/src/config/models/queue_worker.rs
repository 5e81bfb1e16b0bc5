use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::validation::{ConfigValidator, ValidationUtils};
use crate::SchedulerResult;

/// 队列管理器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// 队列中待调度任务的最大数量
    pub max_queue_size: usize,
    /// 提交时未指定时使用的最大重试次数
    pub default_max_retries: u32,
    /// `wait` 轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 已结束任务的保留时间（秒）
    pub cleanup_max_age_seconds: u64,
    /// 后台维护循环的间隔（秒）
    pub maintenance_interval_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            default_max_retries: 3,
            poll_interval_ms: 100,
            cleanup_max_age_seconds: 24 * 60 * 60,
            maintenance_interval_seconds: 60,
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cleanup_max_age(&self) -> Duration {
        Duration::from_secs(self.cleanup_max_age_seconds)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_seconds)
    }
}

impl ConfigValidator for QueueConfig {
    fn validate(&self) -> SchedulerResult<()> {
        ValidationUtils::validate_count(self.max_queue_size, "queue.max_queue_size", 1_000_000)?;
        ValidationUtils::validate_interval_ms(self.poll_interval_ms, "queue.poll_interval_ms")?;
        ValidationUtils::validate_timeout_seconds(
            self.cleanup_max_age_seconds,
            "queue.cleanup_max_age_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.maintenance_interval_seconds,
            "queue.maintenance_interval_seconds",
        )?;
        Ok(())
    }
}

/// Worker池配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker数量
    pub pool_size: usize,
    /// 没有就绪任务时的轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 基础设施错误后的退避时间（毫秒）
    pub error_backoff_ms: u64,
    /// 停止整个池时的总等待时间（秒）
    pub stop_timeout_seconds: u64,
    /// 任务未指定超时时使用的默认超时（秒），为空表示不限制
    pub default_task_timeout_seconds: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            poll_interval_ms: 100,
            error_backoff_ms: 1000,
            stop_timeout_seconds: 30,
            default_task_timeout_seconds: None,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_seconds)
    }

    pub fn default_task_timeout(&self) -> Option<Duration> {
        self.default_task_timeout_seconds.map(Duration::from_secs)
    }
}

impl ConfigValidator for WorkerConfig {
    fn validate(&self) -> SchedulerResult<()> {
        ValidationUtils::validate_count(self.pool_size, "worker.pool_size", 1024)?;
        ValidationUtils::validate_interval_ms(self.poll_interval_ms, "worker.poll_interval_ms")?;
        ValidationUtils::validate_interval_ms(self.error_backoff_ms, "worker.error_backoff_ms")?;
        ValidationUtils::validate_timeout_seconds(
            self.stop_timeout_seconds,
            "worker.stop_timeout_seconds",
        )?;
        if let Some(timeout) = self.default_task_timeout_seconds {
            ValidationUtils::validate_timeout_seconds(
                timeout,
                "worker.default_task_timeout_seconds",
            )?;
        }
        Ok(())
    }
}
