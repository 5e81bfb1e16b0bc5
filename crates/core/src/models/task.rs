use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{SchedulerError, SchedulerResult};
use crate::traits::{TaskContext, TaskHandler};

/// 任务优先级，数值越大越先被调度
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskPriority {
    #[serde(rename = "LOW")]
    Low = 1,
    #[serde(rename = "NORMAL")]
    Normal = 2,
    #[serde(rename = "HIGH")]
    High = 3,
    #[serde(rename = "URGENT")]
    Urgent = 4,
}

impl TaskPriority {
    pub fn value(self) -> u8 {
        self as u8
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Normal
    }
}

impl TryFrom<u8> for TaskPriority {
    type Error = SchedulerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(TaskPriority::Low),
            2 => Ok(TaskPriority::Normal),
            3 => Ok(TaskPriority::High),
            4 => Ok(TaskPriority::Urgent),
            _ => Err(SchedulerError::Internal(format!(
                "Invalid task priority: {value}"
            ))),
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskPriority::Low => "LOW",
            TaskPriority::Normal => "NORMAL",
            TaskPriority::High => "HIGH",
            TaskPriority::Urgent => "URGENT",
        };
        f.write_str(s)
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
    #[serde(rename = "TIMEOUT")]
    Timeout,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
            TaskStatus::Timeout => "TIMEOUT",
        }
    }

    /// 终止状态：任务不会再被执行（重试除外）
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Timeout
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(TaskStatus::Pending),
            "RUNNING" => Ok(TaskStatus::Running),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            "CANCELLED" => Ok(TaskStatus::Cancelled),
            "TIMEOUT" => Ok(TaskStatus::Timeout),
            _ => Err(SchedulerError::Internal(format!("Invalid task status: {s}"))),
        }
    }
}

/// 任务
///
/// 一个待执行的工作单元：处理函数、参数以及调度元数据。
/// 任务由队列管理器创建并登记到注册表中，之后只通过注册表修改。
#[derive(Clone)]
pub struct Task {
    pub task_id: String,
    pub handler: Arc<dyn TaskHandler>,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub priority: TaskPriority,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    /// 单次执行的最长时间，超时后记录为 `TIMEOUT`
    pub timeout: Option<Duration>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub status: TaskStatus,
    /// 仅在 `RUNNING` 期间有值
    pub worker_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, Value>,
}

impl Task {
    pub fn new(handler: Arc<dyn TaskHandler>) -> Self {
        let now = Utc::now();
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            handler,
            args: Vec::new(),
            kwargs: Map::new(),
            priority: TaskPriority::Normal,
            created_at: now,
            scheduled_at: now,
            timeout: None,
            retry_count: 0,
            max_retries: 3,
            status: TaskStatus::Pending,
            worker_id: None,
            started_at: None,
            completed_at: None,
            metadata: HashMap::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.is_ready_at(Utc::now())
    }

    pub fn is_ready_at(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.scheduled_at <= now
    }

    pub fn is_running(&self) -> bool {
        self.status == TaskStatus::Running
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn can_retry(&self) -> bool {
        self.status == TaskStatus::Failed && self.retry_count < self.max_retries
    }

    /// PENDING -> CANCELLED，其他状态下返回 false
    pub fn cancel(&mut self) -> bool {
        if self.status != TaskStatus::Pending {
            return false;
        }
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        true
    }

    /// PENDING -> RUNNING，记录执行的worker
    pub fn start(&mut self, worker_id: &str) -> bool {
        if self.status != TaskStatus::Pending {
            return false;
        }
        self.status = TaskStatus::Running;
        self.worker_id = Some(worker_id.to_string());
        self.started_at = Some(Utc::now());
        true
    }

    /// RUNNING -> 终止状态
    pub fn finish(&mut self, status: TaskStatus) -> bool {
        if self.status != TaskStatus::Running || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.worker_id = None;
        self.completed_at = Some(Utc::now());
        true
    }

    /// FAILED -> PENDING，重试次数加一
    pub fn reset_for_retry(&mut self) -> bool {
        if !self.can_retry() {
            return false;
        }
        self.retry_count += 1;
        self.status = TaskStatus::Pending;
        self.worker_id = None;
        self.started_at = None;
        self.completed_at = None;
        true
    }

    pub fn handler_name(&self) -> &str {
        self.handler.name()
    }

    /// 可序列化的任务快照，处理函数以名称表示
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.task_id.clone(),
            handler_name: self.handler_name().to_string(),
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
            priority: self.priority,
            timeout_seconds: self.timeout.map(|timeout| timeout.as_secs_f64()),
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            created_at: self.created_at,
            scheduled_at: self.scheduled_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            metadata: self.metadata.clone(),
            status: self.status,
            worker_id: self.worker_id.clone(),
        }
    }

    pub fn to_map(&self) -> SchedulerResult<Map<String, Value>> {
        match serde_json::to_value(self.snapshot())? {
            Value::Object(map) => Ok(map),
            other => Err(SchedulerError::Serialization(format!(
                "Task serialized to a non-object value: {other}"
            ))),
        }
    }

    /// 构造传给处理函数的执行上下文
    pub fn context(&self, worker_id: &str) -> TaskContext {
        TaskContext {
            task_id: self.task_id.clone(),
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
            metadata: self.metadata.clone(),
            retry_count: self.retry_count,
            worker_id: worker_id.to_string(),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("task_id", &self.task_id)
            .field("handler", &self.handler.name())
            .field("priority", &self.priority)
            .field("status", &self.status)
            .field("created_at", &self.created_at)
            .field("scheduled_at", &self.scheduled_at)
            .field("timeout", &self.timeout)
            .field("retry_count", &self.retry_count)
            .field("max_retries", &self.max_retries)
            .field("worker_id", &self.worker_id)
            .finish()
    }
}

/// 任务的可序列化视图，供状态查询使用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub handler_name: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub priority: TaskPriority,
    pub timeout_seconds: Option<f64>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, Value>,
    pub status: TaskStatus,
    pub worker_id: Option<String>,
}
