//! Test handlers covering the common handler outcomes

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use taskq_core::{handler_fn, TaskContext, TaskHandler};

/// Returns the positional arguments as a JSON array
pub fn echo_handler() -> Arc<dyn TaskHandler> {
    handler_fn("echo", |ctx| async move { Ok(Value::Array(ctx.args)) })
}

/// Always fails with the given message
pub fn failing_handler(message: &str) -> Arc<dyn TaskHandler> {
    let message = message.to_string();
    handler_fn("failing", move |_ctx| {
        let message = message.clone();
        async move { Err(anyhow::anyhow!(message)) }
    })
}

/// Sleeps for `duration`, then returns `"slept"`
pub fn sleeping_handler(duration: Duration) -> Arc<dyn TaskHandler> {
    handler_fn("sleeping", move |_ctx| async move {
        tokio::time::sleep(duration).await;
        Ok(json!("slept"))
    })
}

pub fn panicking_handler(message: &'static str) -> Arc<dyn TaskHandler> {
    handler_fn("panicking", move |_ctx| async move {
        if !message.is_empty() {
            panic!("{}", message);
        }
        Ok(Value::Null)
    })
}

/// Fails until it has been invoked `failures` times, then succeeds
pub fn flaky_handler(failures: usize) -> Arc<dyn TaskHandler> {
    let calls = Arc::new(AtomicUsize::new(0));
    handler_fn("flaky", move |_ctx| {
        let call = calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if call < failures {
                Err(anyhow::anyhow!("attempt {} failed", call + 1))
            } else {
                Ok(json!(call + 1))
            }
        }
    })
}

/// Records every execution, keyed by task id, plus the order of the first
/// positional argument.
#[derive(Default)]
pub struct RecordingHandler {
    executions: Mutex<HashMap<String, usize>>,
    order: Mutex<Vec<Value>>,
    delay: Option<Duration>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Default::default()
        })
    }

    /// Number of times each task id was executed
    pub fn executions(&self) -> HashMap<String, usize> {
        self.executions.lock().unwrap().clone()
    }

    pub fn total_executions(&self) -> usize {
        self.executions.lock().unwrap().values().sum()
    }

    /// First positional argument of each execution, in execution order
    pub fn order(&self) -> Vec<Value> {
        self.order.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskHandler for RecordingHandler {
    async fn execute(&self, context: TaskContext) -> anyhow::Result<Value> {
        {
            let mut executions = self.executions.lock().unwrap();
            *executions.entry(context.task_id.clone()).or_insert(0) += 1;
        }
        self.order
            .lock()
            .unwrap()
            .push(context.arg(0).cloned().unwrap_or(Value::Null));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(json!({ "task_id": context.task_id, "args": context.args }))
    }

    fn name(&self) -> &str {
        "recording"
    }
}
