//! Task execution infrastructure.
//!
//! This module provides the elastic worker pool, its bounded task queue,
//! rejection policies, result handles and the completion tracker.

pub mod completion;
pub mod handle;
pub mod panic_handler;
pub mod pool;
pub(crate) mod queue;
pub mod rejection;
pub(crate) mod task;
pub mod worker;

pub use completion::CompletionTracker;
pub use handle::{
    cancellation_requested, current_task_id, Cancellable, ResultHandle, TaskStatus,
};
pub use panic_handler::PanicInfo;
pub use pool::{PoolStats, RunState, WorkerPool};
pub use rejection::{RejectionAction, RejectionContext, RejectionPolicy};
pub(crate) use task::Task;
pub use task::TaskId;
pub use worker::WorkerId;
