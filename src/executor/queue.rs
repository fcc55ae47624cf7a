//! Bounded FIFO of pending tasks shared by submitters and workers.

use super::task::{Task, TaskId};
use crate::util;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

struct QueueState {
    items: VecDeque<Task>,
    /// Consumers currently blocked in `take`/`poll`.
    waiting: usize,
    closed: bool,
}

/// Bounded FIFO queue.
///
/// A capacity of zero turns the queue into a hand-off: `offer` only succeeds
/// while an idle consumer is blocked waiting for work.
///
/// Tasks are never dropped while the internal lock is held; removed tasks are
/// handed back to the caller instead.
pub(crate) struct TaskQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    capacity: usize,
}

impl TaskQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(1024)),
                waiting: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn has_room(&self, state: &QueueState) -> bool {
        if self.capacity == 0 {
            state.items.len() < state.waiting
        } else {
            state.items.len() < self.capacity
        }
    }

    /// Enqueue without blocking. Gives the task back when full or closed.
    pub fn offer(&self, task: Task) -> Result<(), Task> {
        let mut state = self.state.lock();
        if state.closed || !self.has_room(&state) {
            return Err(task);
        }
        state.items.push_back(task);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Evict the head of the queue and enqueue `task` in one step.
    ///
    /// Returns the evicted task (if any) and, when there is still no room,
    /// the rejected new task.
    pub fn replace_oldest(&self, task: Task) -> (Option<Task>, Option<Task>) {
        let mut state = self.state.lock();
        if state.closed {
            return (None, Some(task));
        }
        let evicted = if self.has_room(&state) {
            None
        } else {
            state.items.pop_front()
        };
        if !self.has_room(&state) {
            return (evicted, Some(task));
        }
        state.items.push_back(task);
        drop(state);
        self.not_empty.notify_one();
        (evicted, None)
    }

    /// Block until a task is available. `None` once closed and drained.
    pub fn take(&self) -> Option<Task> {
        let mut state = self.state.lock();
        loop {
            if let Some(task) = state.items.pop_front() {
                return Some(task);
            }
            if state.closed {
                return None;
            }
            state.waiting += 1;
            self.not_empty.wait(&mut state);
            state.waiting -= 1;
        }
    }

    /// Wait up to `timeout` for a task.
    pub fn poll(&self, timeout: Duration) -> Option<Task> {
        let deadline = match util::deadline(timeout) {
            Some(deadline) => deadline,
            None => return self.take(),
        };
        let mut state = self.state.lock();
        loop {
            if let Some(task) = state.items.pop_front() {
                return Some(task);
            }
            if state.closed {
                return None;
            }
            state.waiting += 1;
            let timed_out = self.not_empty.wait_until(&mut state, deadline).timed_out();
            state.waiting -= 1;
            if timed_out {
                return state.items.pop_front();
            }
        }
    }

    pub fn remove(&self, id: TaskId) -> Option<Task> {
        let mut state = self.state.lock();
        let pos = state.items.iter().position(|t| t.id == id)?;
        state.items.remove(pos)
    }

    /// Drop queued tasks whose handle was already cancelled.
    pub fn remove_cancelled(&self) -> Vec<Task> {
        let mut state = self.state.lock();
        let (cancelled, kept): (VecDeque<Task>, VecDeque<Task>) = state
            .items
            .drain(..)
            .partition(|t| t.is_cancelled());
        state.items = kept;
        cancelled.into()
    }

    pub fn drain(&self) -> Vec<Task> {
        self.state.lock().items.drain(..).collect()
    }

    /// Refuse further offers and wake every blocked consumer.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TaskQueue")
            .field("capacity", &self.capacity)
            .field("len", &state.items.len())
            .field("waiting", &state.waiting)
            .field("closed", &state.closed)
            .finish()
    }
}
