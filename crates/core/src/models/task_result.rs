use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{SchedulerError, SchedulerResult};
use crate::models::TaskStatus;

/// 任务执行结果
///
/// 每次执行尝试结束时由Worker创建一次，之后不可变。
/// `result` 与 `error` 互斥。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// 执行耗时（秒）
    pub execution_time: f64,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl TaskResult {
    pub fn success(
        task_id: impl Into<String>,
        value: Value,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        metadata: HashMap<String, Value>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Completed,
            result: Some(value),
            error: None,
            start_time,
            end_time,
            execution_time: elapsed_seconds(start_time, end_time),
            metadata,
        }
    }

    pub fn failure(
        task_id: impl Into<String>,
        error: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        metadata: HashMap<String, Value>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Failed,
            result: None,
            error: Some(error.into()),
            start_time,
            end_time,
            execution_time: elapsed_seconds(start_time, end_time),
            metadata,
        }
    }

    pub fn timeout(
        task_id: impl Into<String>,
        error: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        metadata: HashMap<String, Value>,
    ) -> Self {
        Self {
            status: TaskStatus::Timeout,
            ..Self::failure(task_id, error, start_time, end_time, metadata)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    /// 转换为普通的键值映射，便于API层直接返回
    pub fn to_map(&self) -> SchedulerResult<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(SchedulerError::Serialization(format!(
                "TaskResult serialized to a non-object value: {other}"
            ))),
        }
    }

    pub fn from_map(map: Map<String, Value>) -> SchedulerResult<Self> {
        Ok(serde_json::from_value(Value::Object(map))?)
    }
}

fn elapsed_seconds(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> f64 {
    let elapsed = end_time - start_time;
    match elapsed.num_microseconds() {
        Some(micros) => micros as f64 / 1_000_000.0,
        None => elapsed.num_milliseconds() as f64 / 1_000.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_execution_time_is_derived() {
        let start = Utc::now();
        let end = start + chrono::Duration::milliseconds(1500);
        let result = TaskResult::success("t1", json!(1), start, end, HashMap::new());
        assert!((result.execution_time - 1.5).abs() < f64::EPSILON);
        assert!(result.is_success());
        assert!(result.error.is_none());
    }

    #[test]
    fn test_failure_and_timeout_carry_error() {
        let now = Utc::now();
        let failed = TaskResult::failure("t1", "boom", now, now, HashMap::new());
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert!(failed.result.is_none());

        let timed_out = TaskResult::timeout("t2", "too slow", now, now, HashMap::new());
        assert_eq!(timed_out.status, TaskStatus::Timeout);
        assert_eq!(timed_out.task_id, "t2");
    }

    #[test]
    fn test_map_round_trip_preserves_fields() {
        let start = Utc::now();
        let end = start + chrono::Duration::milliseconds(42);
        let mut metadata = HashMap::new();
        metadata.insert("source".to_string(), json!("upload"));

        let completed = TaskResult::success("t1", json!({"pages": 3}), start, end, metadata);
        let map = completed.to_map().unwrap();
        assert_eq!(map.get("status"), Some(&json!("COMPLETED")));
        assert_eq!(TaskResult::from_map(map).unwrap(), completed);

        let failed = TaskResult::failure("t2", "parse error", start, end, HashMap::new());
        let restored = TaskResult::from_map(failed.to_map().unwrap()).unwrap();
        assert_eq!(restored, failed);
        assert_eq!(restored.error.as_deref(), Some("parse error"));
    }

    #[test]
    fn test_from_map_rejects_incomplete_map() {
        let mut map = Map::new();
        map.insert("task_id".to_string(), json!("t1"));
        assert!(matches!(
            TaskResult::from_map(map),
            Err(SchedulerError::Serialization(_))
        ));
    }
}
