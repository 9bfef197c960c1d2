//! Tasks module - Background execution with progress and cancellation
//!
//! Provides:
//! - cancel: Shared cooperative cancellation flag
//! - progress: Progress sink trait and snapshot type
//! - runner: Worker-per-task runner with an event channel

pub mod cancel;
pub mod progress;
pub mod runner;

pub use cancel::CancelToken;
pub use progress::{NoProgress, Progress, ProgressSink};
pub use runner::{
    TaskContext, TaskEvent, TaskHandle, TaskId, TaskOutcome, TaskProgress, TaskRunner, TaskStatus,
};
