// worker thread stuff
use super::handle::{TaskControl, TaskStatus};
use super::pool::PoolInner;
use super::task::Task;
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

pub type WorkerId = usize;

/// Control block of the task a worker is running, visible to `shutdown_now`.
pub(crate) type CurrentSlot = Arc<Mutex<Option<Arc<dyn TaskControl>>>>;

pub(crate) struct Worker {
    pub id: WorkerId,
    pool: Arc<PoolInner>,
    first: Arc<Mutex<Option<Task>>>,
    current: CurrentSlot,
}

impl Worker {
    pub fn new(
        id: WorkerId,
        pool: Arc<PoolInner>,
        first: Arc<Mutex<Option<Task>>>,
        current: CurrentSlot,
    ) -> Self {
        Self {
            id,
            pool,
            first,
            current,
        }
    }

    // main loop
    pub fn run(self) {
        let mut exit = ExitGuard {
            pool: self.pool.clone(),
            id: self.id,
            ran_task: false,
        };
        tracing::debug!(worker = self.id, "worker started");

        let mut next = self.first.lock().take();
        loop {
            let task = match next.take() {
                Some(task) => task,
                None => match self.pool.next_task(self.id) {
                    Some(task) => task,
                    None => break,
                },
            };
            self.execute_task(task);
            exit.ran_task = true;
        }
    }

    fn execute_task(&self, task: Task) {
        let tid = task.id();
        *self.current.lock() = Some(task.control().clone());
        self.pool.active.fetch_add(1, Ordering::Relaxed);

        // no pool lock is held here
        let status = task.run();

        self.pool.active.fetch_sub(1, Ordering::Relaxed);
        *self.current.lock() = None;

        match status {
            Some(TaskStatus::Failed) => {
                tracing::debug!(worker = self.id, task = %tid, "task failed");
                self.pool.failed.fetch_add(1, Ordering::Relaxed);
            }
            Some(TaskStatus::Completed) => {
                self.pool.completed.fetch_add(1, Ordering::Relaxed);
            }
            // cancelled while running, or already settled elsewhere
            _ => {}
        }
    }
}

struct ExitGuard {
    pool: Arc<PoolInner>,
    id: WorkerId,
    ran_task: bool,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.pool
            .worker_exited(self.id, thread::panicking(), self.ran_task);
    }
}
