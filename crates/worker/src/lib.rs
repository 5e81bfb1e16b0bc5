//! Worker与Worker池
//!
//! Worker从 [`QueueManager`](taskq_dispatcher::QueueManager) 取出就绪任务，
//! 认领后执行处理函数，并把结果写回注册表。

pub mod pool;
pub mod worker;

pub use pool::{PoolStatus, WorkerPool};
pub use worker::{Worker, WorkerStatus};
