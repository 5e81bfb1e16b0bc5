pub mod app_config;
pub mod queue_worker;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use queue_worker::{QueueConfig, WorkerConfig};
