use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::models::{Task, TaskPriority};
use crate::traits::TaskHandler;

/// 任务提交请求
///
/// 提交时需要的全部参数，未设置的字段使用队列配置中的默认值。
///
/// ```rust,ignore
/// let submission = TaskSubmission::new(handler)
///     .with_arg(json!("report.pdf"))
///     .with_kwarg("language", json!("zh"))
///     .with_priority(TaskPriority::High)
///     .with_max_retries(2);
/// let task_id = queue_manager.submit(submission).await?;
/// ```
#[derive(Clone)]
pub struct TaskSubmission {
    pub handler: Arc<dyn TaskHandler>,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub priority: TaskPriority,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, Value>,
}

impl TaskSubmission {
    pub fn new(handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            handler,
            args: Vec::new(),
            kwargs: Map::new(),
            priority: TaskPriority::Normal,
            timeout: None,
            max_retries: None,
            scheduled_at: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_arg(mut self, arg: Value) -> Self {
        self.args.push(arg);
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// 相对当前时间延迟执行
    pub fn with_delay(self, delay: Duration) -> Self {
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        self.scheduled_at(Utc::now() + delay)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// 创建待调度的任务，`scheduled_at` 缺省为创建时间
    pub fn into_task(self, default_max_retries: u32) -> Task {
        let mut task = Task::new(self.handler);
        task.args = self.args;
        task.kwargs = self.kwargs;
        task.priority = self.priority;
        task.timeout = self.timeout;
        task.max_retries = self.max_retries.unwrap_or(default_max_retries);
        if let Some(at) = self.scheduled_at {
            task.scheduled_at = at;
        }
        task.metadata = self.metadata;
        task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskStatus;
    use crate::traits::handler_fn;
    use serde_json::json;

    #[test]
    fn test_defaults_applied() {
        let handler = handler_fn("noop", |_ctx| async { Ok(json!(null)) });
        let task = TaskSubmission::new(handler).into_task(5);
        assert_eq!(task.max_retries, 5);
        assert_eq!(task.priority, TaskPriority::Normal);
        assert_eq!(task.scheduled_at, task.created_at);
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.timeout.is_none());
    }

    #[test]
    fn test_builder_fields_carried_into_task() {
        let handler = handler_fn("echo", |ctx| async move { Ok(json!(ctx.args)) });
        let task = TaskSubmission::new(handler)
            .with_arg(json!(1))
            .with_arg(json!("two"))
            .with_kwarg("mode", json!("fast"))
            .with_priority(TaskPriority::Urgent)
            .with_timeout(Duration::from_secs(3))
            .with_max_retries(1)
            .with_delay(Duration::from_secs(30))
            .with_metadata("owner", json!("tests"))
            .into_task(3);

        assert_eq!(task.args, vec![json!(1), json!("two")]);
        assert_eq!(task.kwargs.get("mode"), Some(&json!("fast")));
        assert_eq!(task.priority, TaskPriority::Urgent);
        assert_eq!(task.timeout, Some(Duration::from_secs(3)));
        assert_eq!(task.max_retries, 1);
        assert!(task.scheduled_at > task.created_at);
        assert!(!task.is_ready());
        assert_eq!(task.metadata.get("owner"), Some(&json!("tests")));
        assert_eq!(task.handler_name(), "echo");
    }
}
