use thiserror::Error;

/// 调度器错误类型定义
///
/// 任务处理函数自身的失败不会出现在这里，它们被记录为 `FAILED` 的
/// [`TaskResult`](crate::models::TaskResult)。这里只包含调度与存储机制本身的错误。
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("队列已满，最大容量: {capacity}")]
    QueueFull { capacity: usize },

    #[error("任务已存在: {id}")]
    DuplicateTask { id: String },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("Worker错误: {0}")]
    Worker(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    pub fn task_not_found<S: Into<String>>(id: S) -> Self {
        Self::TaskNotFound { id: id.into() }
    }
    pub fn duplicate_task<S: Into<String>>(id: S) -> Self {
        Self::DuplicateTask { id: id.into() }
    }
    pub fn worker_error<S: Into<String>>(msg: S) -> Self {
        Self::Worker(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// 调用方可以通过退避后重试来恢复的错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SchedulerError::QueueFull { .. } | SchedulerError::Timeout(_)
        )
    }

    /// 表示内部不变量被破坏的错误
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchedulerError::DuplicateTask { .. }
                | SchedulerError::Internal(_)
                | SchedulerError::Configuration(_)
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for SchedulerError {
    fn from(err: anyhow::Error) -> Self {
        SchedulerError::Internal(err.to_string())
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
