//! 任务注册表与优先级队列
//!
//! [`TaskRegistry`] 保存任务状态与执行结果，[`QueueManager`] 负责提交、
//! 按优先级出队、取消与重试。

pub mod queue_manager;
pub mod registry;

pub use queue_manager::{QueueManager, QueueStatus};
pub use registry::{
    InMemoryTaskRegistry, RegistryStatistics, TaskFilter, TaskMutation, TaskRegistry,
};
