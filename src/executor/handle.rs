//! Result handles and cooperative cancellation.

use super::queue::TaskQueue;
use super::task::TaskId;
use crate::error::{Error, Result};
use crate::util;
use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Lifecycle of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskStatus {
    Pending = 0,
    Running = 1,
    Completed = 2,
    Failed = 3,
    Cancelled = 4,
}

impl TaskStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskStatus::Pending,
            1 => TaskStatus::Running,
            2 => TaskStatus::Completed,
            3 => TaskStatus::Failed,
            _ => TaskStatus::Cancelled,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Anything that can be cancelled by its owner.
pub trait Cancellable {
    /// Request cancellation. Returns true if this call performed the transition.
    fn cancel(&self) -> bool;

    fn is_cancelled(&self) -> bool;
}

/// Type-erased view of a handle, held by queued tasks and workers.
pub(crate) trait TaskControl: Send + Sync {
    fn id(&self) -> TaskId;
    fn status(&self) -> TaskStatus;
    /// Pending -> Running. False if the task was cancelled first.
    fn begin(&self) -> bool;
    fn cancel(&self) -> bool;
    /// Pending -> Cancelled for work dropped without running.
    fn abandon(&self);
    /// Pending -> Failed without firing completion hooks.
    fn reject(&self, err: Error);
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<dyn TaskControl>>> = RefCell::new(None);
}

/// Marks the task running on this thread for the lifetime of the guard.
pub(crate) struct CurrentTask {
    prev: Option<Arc<dyn TaskControl>>,
}

impl CurrentTask {
    pub(crate) fn enter(control: Arc<dyn TaskControl>) -> Self {
        let prev = CURRENT.with(|cur| cur.replace(Some(control)));
        CurrentTask { prev }
    }
}

impl Drop for CurrentTask {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT.with(|cur| *cur.borrow_mut() = prev);
    }
}

/// True when the task executing on this thread has been cancelled.
///
/// Running tasks are never stopped by force; long bodies should poll this
/// and return early.
pub fn cancellation_requested() -> bool {
    CURRENT.with(|cur| {
        cur.borrow()
            .as_ref()
            .map_or(false, |task| task.status() == TaskStatus::Cancelled)
    })
}

/// Id of the task executing on this thread, if any.
pub fn current_task_id() -> Option<TaskId> {
    CURRENT.with(|cur| cur.borrow().as_ref().map(|task| task.id()))
}

enum Slot<T> {
    Empty,
    Ready(Result<T>),
    Taken,
}

type CompletionHook<T> = Box<dyn FnOnce(ResultHandle<T>) + Send>;

struct Shared<T> {
    id: TaskId,
    me: Weak<Shared<T>>,
    status: AtomicU8,
    slot: Mutex<Slot<T>>,
    done: Condvar,
    queue: Option<Weak<TaskQueue>>,
    hook: Mutex<Option<CompletionHook<T>>>,
}

impl<T: Send + 'static> Shared<T> {
    /// Single terminal transition. Returns the status it replaced, or `None`
    /// if the task was not in one of `from`.
    fn settle(
        &self,
        from: &[TaskStatus],
        to: TaskStatus,
        outcome: Result<T>,
        fire_hook: bool,
    ) -> Option<TaskStatus> {
        let prev = {
            let mut slot = self.slot.lock();
            let mut current = self.status.load(Ordering::Acquire);
            loop {
                if !from.contains(&TaskStatus::from_u8(current)) {
                    return None;
                }
                match self.status.compare_exchange(
                    current,
                    to as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => break,
                    Err(actual) => current = actual,
                }
            }
            *slot = Slot::Ready(outcome);
            self.done.notify_all();
            TaskStatus::from_u8(current)
        };

        let hook = self.hook.lock().take();
        if let (true, Some(hook), Some(me)) = (fire_hook, hook, self.me.upgrade()) {
            hook(ResultHandle { shared: me });
        }
        Some(prev)
    }

    fn cancel_task(&self) -> bool {
        let prev = self.settle(
            &[TaskStatus::Pending, TaskStatus::Running],
            TaskStatus::Cancelled,
            Err(Error::Cancelled),
            true,
        );
        match prev {
            Some(TaskStatus::Pending) => {
                if let Some(queue) = self.queue.as_ref().and_then(Weak::upgrade) {
                    drop(queue.remove(self.id));
                }
                true
            }
            Some(_) => true,
            None => false,
        }
    }
}

impl<T: Send + 'static> TaskControl for Shared<T> {
    fn id(&self) -> TaskId {
        self.id
    }

    fn status(&self) -> TaskStatus {
        TaskStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn begin(&self) -> bool {
        self.status
            .compare_exchange(
                TaskStatus::Pending as u8,
                TaskStatus::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn cancel(&self) -> bool {
        self.cancel_task()
    }

    fn abandon(&self) {
        self.settle(
            &[TaskStatus::Pending],
            TaskStatus::Cancelled,
            Err(Error::Cancelled),
            true,
        );
    }

    fn reject(&self, err: Error) {
        self.settle(&[TaskStatus::Pending], TaskStatus::Failed, Err(err), false);
    }
}

/// Eventual outcome of a submitted task.
///
/// Handles are cheap to clone; every clone observes the same task. The value
/// itself can be taken once, by whichever clone calls [`join`](Self::join)
/// first.
pub struct ResultHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ResultHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> ResultHandle<T> {
    pub(crate) fn new(queue: Option<Weak<TaskQueue>>) -> Self {
        let shared = Arc::new_cyclic(|me| Shared {
            id: TaskId::next(),
            me: me.clone(),
            status: AtomicU8::new(TaskStatus::Pending as u8),
            slot: Mutex::new(Slot::Empty),
            done: Condvar::new(),
            queue,
            hook: Mutex::new(None),
        });
        Self { shared }
    }

    pub(crate) fn control(&self) -> Arc<dyn TaskControl> {
        self.shared.clone()
    }

    /// Install a callback fired right after the terminal transition.
    pub(crate) fn on_completion<F>(&self, hook: F)
    where
        F: FnOnce(ResultHandle<T>) + Send + 'static,
    {
        *self.shared.hook.lock() = Some(Box::new(hook));
    }

    /// Running -> Completed/Failed. A late result after cancellation is dropped.
    pub(crate) fn complete(&self, outcome: Result<T>) -> bool {
        let to = if outcome.is_ok() {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        self.shared
            .settle(&[TaskStatus::Running], to, outcome, true)
            .is_some()
    }

    pub(crate) fn fail(&self, err: Error) -> bool {
        self.shared
            .settle(
                &[TaskStatus::Pending, TaskStatus::Running],
                TaskStatus::Failed,
                Err(err),
                true,
            )
            .is_some()
    }

    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    pub fn status(&self) -> TaskStatus {
        self.shared.status()
    }

    pub fn is_done(&self) -> bool {
        self.status().is_terminal()
    }

    /// Block until the task reaches a terminal state.
    pub fn wait(&self) {
        let mut slot = self.shared.slot.lock();
        while matches!(*slot, Slot::Empty) {
            self.shared.done.wait(&mut slot);
        }
    }

    /// Returns false if the task is still unfinished after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = match util::deadline(timeout) {
            Some(deadline) => deadline,
            None => {
                self.wait();
                return true;
            }
        };
        let mut slot = self.shared.slot.lock();
        while matches!(*slot, Slot::Empty) {
            if self.shared.done.wait_until(&mut slot, deadline).timed_out() {
                return !matches!(*slot, Slot::Empty);
            }
        }
        true
    }

    /// Block for the outcome and take it.
    pub fn join(&self) -> Result<T> {
        self.wait();
        self.take_outcome()
    }

    /// Like [`join`](Self::join), failing with [`Error::Timeout`] if the task
    /// is unfinished after `timeout`. The handle stays usable after a timeout.
    pub fn join_timeout(&self, timeout: Duration) -> Result<T> {
        if !self.wait_timeout(timeout) {
            return Err(Error::Timeout);
        }
        self.take_outcome()
    }

    fn take_outcome(&self) -> Result<T> {
        let mut slot = self.shared.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(outcome) => outcome,
            Slot::Taken => Err(Error::AlreadyRetrieved),
            Slot::Empty => {
                *slot = Slot::Empty;
                Err(Error::executor("outcome read before completion"))
            }
        }
    }
}

impl<T: Send + 'static> Cancellable for ResultHandle<T> {
    /// Queued tasks are removed from the queue and never run. A running task
    /// only sees [`cancellation_requested`] turn true; its eventual result is
    /// discarded.
    fn cancel(&self) -> bool {
        self.shared.cancel_task()
    }

    fn is_cancelled(&self) -> bool {
        self.status() == TaskStatus::Cancelled
    }
}

impl<T> std::fmt::Debug for ResultHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultHandle")
            .field("id", &self.shared.id)
            .field(
                "status",
                &TaskStatus::from_u8(self.shared.status.load(Ordering::Acquire)),
            )
            .finish()
    }
}
