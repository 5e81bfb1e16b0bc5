//! Builders for tasks that bypass the queue manager
//!
//! Useful when a test needs a task in a specific state (old, terminal,
//! scheduled in the future) registered directly in a registry.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use taskq_core::{Task, TaskHandler, TaskPriority, TaskStatus};

use crate::handlers::echo_handler;

pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self {
            task: Task::new(echo_handler()),
        }
    }

    pub fn with_id(mut self, task_id: &str) -> Self {
        self.task.task_id = task_id.to_string();
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.task.handler = handler;
        self
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.task.args = args;
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.task.max_retries = max_retries;
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.task.created_at = created_at;
        self.task.scheduled_at = created_at;
        self
    }

    /// Shift creation time into the past
    pub fn aged(self, age: Duration) -> Self {
        self.created_at(Utc::now() - age)
    }

    pub fn scheduled_at(mut self, scheduled_at: DateTime<Utc>) -> Self {
        self.task.scheduled_at = scheduled_at;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}
