pub mod task_handler;

pub use task_handler::{
    blocking_handler, handler_fn, panic_message, BlockingFnHandler, FnHandler, TaskContext,
    TaskHandler,
};
