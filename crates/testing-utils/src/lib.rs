//! # Taskq Testing Utils
//!
//! 各crate测试共用的工具：
//!
//! - **handlers**: 常用的测试处理器（回显、失败、休眠、panic、计数）
//! - **mocks**: 可注入故障的注册表
//! - **builders**: 直接构造任务的构建器
//! - **helpers**: 队列/Worker配置与异步等待
//!
//! ```toml
//! [dev-dependencies]
//! taskq-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod handlers;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use handlers::*;
pub use helpers::*;
pub use mocks::*;
