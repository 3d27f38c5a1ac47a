//! Shared utilities used by the worker and client binaries.

mod logger;
mod payload;
mod settings;

pub use logger::init_logger;
pub use payload::parse_workflow_result;
pub use settings::{DEFAULT_TASK_QUEUE, Settings};
