pub mod submission;
pub mod task;
pub mod task_result;

pub use submission::TaskSubmission;
pub use task::{Task, TaskPriority, TaskSnapshot, TaskStatus};
pub use task_result::TaskResult;
