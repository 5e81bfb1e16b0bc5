//! 任务处理函数接口定义
//!
//! 队列本身不关心任务做什么：文档解析、模型推理、文本分析都只是一个
//! 实现了 [`TaskHandler`] 的对象。Worker 负责调用 `execute`，并把返回值或
//! 错误记录为 [`TaskResult`](crate::models::TaskResult)。
//!
//! ## 使用示例
//!
//! ### 实现自定义处理器
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use taskq_core::traits::{TaskContext, TaskHandler};
//!
//! pub struct ParseDocument;
//!
//! #[async_trait]
//! impl TaskHandler for ParseDocument {
//!     async fn execute(&self, context: TaskContext) -> anyhow::Result<serde_json::Value> {
//!         let path = context.arg_str(0).ok_or_else(|| anyhow::anyhow!("missing path"))?;
//!         Ok(serde_json::json!({ "path": path, "pages": 12 }))
//!     }
//!
//!     fn name(&self) -> &str {
//!         "parse_document"
//!     }
//! }
//! ```
//!
//! ### 使用闭包
//!
//! ```rust,ignore
//! let handler = handler_fn("double", |ctx| async move {
//!     let n = ctx.arg_i64(0).unwrap_or_default();
//!     Ok(serde_json::json!(n * 2))
//! });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 任务执行上下文
///
/// 包含处理函数执行所需的参数，以及少量调度信息（重试次数、执行的Worker）。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskContext {
    pub task_id: String,
    /// 位置参数
    pub args: Vec<Value>,
    /// 关键字参数
    pub kwargs: Map<String, Value>,
    pub metadata: HashMap<String, Value>,
    pub retry_count: u32,
    pub worker_id: String,
}

impl TaskContext {
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    pub fn arg_i64(&self, index: usize) -> Option<i64> {
        self.args.get(index).and_then(Value::as_i64)
    }

    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.args.get(index).and_then(Value::as_str)
    }

    pub fn kwarg(&self, key: &str) -> Option<&Value> {
        self.kwargs.get(key)
    }
}

/// 任务处理器
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// 执行任务，返回的错误会被记录为任务失败，不会向上传播
    async fn execute(&self, context: TaskContext) -> anyhow::Result<Value>;

    /// 处理器名称，用于日志
    fn name(&self) -> &str {
        "anonymous"
    }
}

/// 基于异步闭包的处理器
pub struct FnHandler<F> {
    name: String,
    func: F,
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn execute(&self, context: TaskContext) -> anyhow::Result<Value> {
        (self.func)(context).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 基于同步闭包的处理器，在tokio的阻塞线程池中运行
///
/// 适合CPU密集或调用阻塞IO的处理函数，避免占用运行时的工作线程。
pub struct BlockingFnHandler<F> {
    name: String,
    func: Arc<F>,
}

#[async_trait]
impl<F> TaskHandler for BlockingFnHandler<F>
where
    F: Fn(TaskContext) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    async fn execute(&self, context: TaskContext) -> anyhow::Result<Value> {
        let func = Arc::clone(&self.func);
        match tokio::task::spawn_blocking(move || func(context)).await {
            Ok(result) => result,
            Err(join_error) if join_error.is_panic() => {
                let payload = join_error.into_panic();
                Err(anyhow::anyhow!(
                    "handler panicked: {}",
                    panic_message(payload.as_ref())
                ))
            }
            Err(join_error) => Err(anyhow::anyhow!("handler was cancelled: {join_error}")),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 用异步闭包创建处理器
pub fn handler_fn<F, Fut>(name: impl Into<String>, func: F) -> Arc<dyn TaskHandler>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        func,
    })
}

/// 用同步闭包创建处理器
pub fn blocking_handler<F>(name: impl Into<String>, func: F) -> Arc<dyn TaskHandler>
where
    F: Fn(TaskContext) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(BlockingFnHandler {
        name: name.into(),
        func: Arc::new(func),
    })
}

/// 从panic负载中提取可读的消息
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
