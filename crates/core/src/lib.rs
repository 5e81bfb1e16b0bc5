pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use config::{AppConfig, ConfigValidator, QueueConfig, WorkerConfig};
pub use errors::{SchedulerError, SchedulerResult};
pub use logging::{LogConfig, LogLevel, OutputFormat};
pub use models::{Task, TaskPriority, TaskResult, TaskSnapshot, TaskStatus, TaskSubmission};
pub use traits::{blocking_handler, handler_fn, TaskContext, TaskHandler};
