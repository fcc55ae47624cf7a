use super::scheduled::PeriodicTask;
use crate::executor::Task;
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Instant;

pub(crate) enum Job {
    Once(Task),
    Periodic(Arc<PeriodicTask>),
}

impl Job {
    fn is_cancelled(&self) -> bool {
        match self {
            Job::Once(task) => task.is_cancelled(),
            Job::Periodic(task) => task.is_done(),
        }
    }
}

pub(crate) struct Delayed {
    pub(crate) due: Instant,
    seq: u64,
    pub(crate) job: Job,
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Delayed {}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delayed {
    // reversed: BinaryHeap is a max-heap and the earliest due time wins
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct DelayState {
    heap: BinaryHeap<Delayed>,
    seq: u64,
    shutdown: bool,
    stopped: bool,
}

/// Min-heap of scheduled jobs keyed by due time, with ties broken by
/// insertion order.
pub(crate) struct DelayQueue {
    state: Mutex<DelayState>,
    cond: Condvar,
}

impl DelayQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(DelayState {
                heap: BinaryHeap::new(),
                seq: 0,
                shutdown: false,
                stopped: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Hands the job back once the queue is shut down.
    pub(crate) fn push(&self, due: Instant, job: Job) -> Result<(), Job> {
        let mut state = self.state.lock();
        if state.shutdown {
            return Err(job);
        }
        let seq = state.seq;
        state.seq += 1;
        let is_head = state.heap.peek().map_or(true, |head| due < head.due);
        state.heap.push(Delayed { due, seq, job });
        if is_head {
            self.cond.notify_one();
        }
        Ok(())
    }

    /// Block until the earliest job is due and pop it. Returns `None` once
    /// the queue is stopped, or shut down with nothing left to fire.
    pub(crate) fn next_due(&self) -> Option<Delayed> {
        let mut state = self.state.lock();
        loop {
            if state.stopped {
                return None;
            }
            match state.heap.peek().map(|head| head.due) {
                None if state.shutdown => return None,
                None => self.cond.wait(&mut state),
                Some(due) if due <= Instant::now() => return state.heap.pop(),
                Some(due) => {
                    self.cond.wait_until(&mut state, due);
                }
            }
        }
    }

    /// Stop accepting jobs. Pending one-shot jobs stay; periodic ones are
    /// removed and returned.
    pub(crate) fn shutdown(&self) -> Vec<Arc<PeriodicTask>> {
        let mut state = self.state.lock();
        state.shutdown = true;
        let (once, periodic): (Vec<Delayed>, Vec<Delayed>) = std::mem::take(&mut state.heap)
            .into_iter()
            .partition(|d| matches!(d.job, Job::Once(_)));
        state.heap = once.into();
        self.cond.notify_all();

        periodic
            .into_iter()
            .filter_map(|d| match d.job {
                Job::Periodic(task) => Some(task),
                Job::Once(_) => None,
            })
            .collect()
    }

    /// Stop immediately and hand back everything still waiting.
    pub(crate) fn shutdown_now(&self) -> Vec<Job> {
        let mut state = self.state.lock();
        state.shutdown = true;
        state.stopped = true;
        self.cond.notify_all();
        std::mem::take(&mut state.heap)
            .into_iter()
            .map(|d| d.job)
            .collect()
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Remove cancelled jobs. The caller drops them after the lock is gone.
    pub(crate) fn remove_cancelled(&self) -> Vec<Job> {
        let mut state = self.state.lock();
        let (gone, keep): (Vec<Delayed>, Vec<Delayed>) = std::mem::take(&mut state.heap)
            .into_iter()
            .partition(|d| d.job.is_cancelled());
        state.heap = keep.into();
        gone.into_iter().map(|d| d.job).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().heap.len()
    }
}
