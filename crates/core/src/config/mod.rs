//! 配置管理
//!
//! 配置按 默认值 -> TOML文件 -> `TASKQ_*` 环境变量 的顺序叠加，
//! 加载完成后统一经过 [`ConfigValidator`] 校验。

pub mod models;
pub mod validation;

pub use models::{AppConfig, QueueConfig, WorkerConfig};
pub use validation::{ConfigValidator, ValidationUtils};
