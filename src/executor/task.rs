//! Task representation and execution.

use super::handle::{self, TaskControl, TaskStatus};
use crate::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Global task ID counter
static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a submitted task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        TaskId(TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// A unit of work plus the control block of the handle observing it.
///
/// Dropping a task that never ran moves its handle to `Cancelled`, so work
/// discarded by a rejection policy or drained at shutdown never leaves a
/// caller blocked.
pub(crate) struct Task {
    pub(crate) id: TaskId,
    func: Option<Box<dyn FnOnce() + Send + 'static>>,
    control: Arc<dyn TaskControl>,
    pub(crate) submitted_at: Instant,
}

impl Task {
    pub(crate) fn new(
        func: Box<dyn FnOnce() + Send + 'static>,
        control: Arc<dyn TaskControl>,
    ) -> Self {
        Task {
            id: control.id(),
            func: Some(func),
            control,
            submitted_at: Instant::now(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn control(&self) -> &Arc<dyn TaskControl> {
        &self.control
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.control.status() == TaskStatus::Cancelled
    }

    /// Fail the task without running it. Completion hooks are not fired.
    pub(crate) fn reject(self, err: Error) {
        self.control.reject(err);
    }

    /// Run on the current thread.
    ///
    /// Returns the terminal status, or `None` if the task was cancelled
    /// before it could start.
    pub(crate) fn run(mut self) -> Option<TaskStatus> {
        if !self.control.begin() {
            return None;
        }
        let func = self.func.take()?;
        let _current = handle::CurrentTask::enter(self.control.clone());
        func();
        Some(self.control.status())
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if self.func.is_some() {
            self.control.abandon();
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("status", &self.control.status())
            .field("submitted_at", &self.submitted_at)
            .finish()
    }
}
