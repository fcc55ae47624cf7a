use super::handle::{ResultHandle, TaskControl};
use super::panic_handler;
use super::queue::TaskQueue;
use super::rejection::{RejectionAction, RejectionContext};
use super::task::{Task, TaskId};
use super::worker::{CurrentSlot, Worker, WorkerId};
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::util;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Pool lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Accepting submissions.
    Running,
    /// No new submissions; queued work is still drained.
    ShuttingDown,
    /// Every worker has exited.
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub pool_size: usize,
    pub active: usize,
    pub largest_pool_size: usize,
    pub queued: usize,
    pub completed: u64,
    pub failed: u64,
    /// Times the rejection policy was consulted.
    pub rejected: u64,
}

struct PoolState {
    run_state: RunState,
    workers: HashMap<WorkerId, CurrentSlot>,
    largest: usize,
}

pub(crate) struct PoolInner {
    config: PoolConfig,
    pub(crate) queue: Arc<TaskQueue>,
    state: Mutex<PoolState>,
    terminated: Condvar,
    next_worker_id: AtomicUsize,
    pub(crate) active: AtomicUsize,
    pub(crate) completed: AtomicU64,
    pub(crate) failed: AtomicU64,
    rejected: AtomicU64,
}

impl PoolInner {
    /// Start a worker, optionally bound to its first task. Must be called
    /// with the state lock held. On failure the first task is handed back.
    fn add_worker(
        self: &Arc<Self>,
        state: &mut PoolState,
        first: Option<Task>,
    ) -> std::result::Result<(), (Error, Option<Task>)> {
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let current: CurrentSlot = Arc::new(Mutex::new(None));
        let first = Arc::new(Mutex::new(first));
        let worker = Worker::new(id, self.clone(), first.clone(), current.clone());

        let mut builder =
            thread::Builder::new().name(format!("{}-{}", self.config.thread_name_prefix, id));
        if let Some(stack_size) = self.config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        // registered before the thread exists so the worker counts itself
        state.workers.insert(id, current);
        match builder.spawn(move || worker.run()) {
            Ok(_) => {
                state.largest = state.largest.max(state.workers.len());
                Ok(())
            }
            Err(e) => {
                state.workers.remove(&id);
                let err = Error::executor(format!("spawn failed: {}", e));
                self.config.report(&err);
                let task = first.lock().take();
                Err((err, task))
            }
        }
    }

    fn dispatch(self: &Arc<Self>, task: Task) -> Result<()> {
        let mut state = self.state.lock();
        if state.run_state != RunState::Running {
            drop(state);
            task.reject(Error::Shutdown);
            return Err(Error::Shutdown);
        }

        if state.workers.len() < self.config.core_size {
            return self.start_with(state, task);
        }

        let task = match self.queue.offer(task) {
            Ok(()) => {
                if state.workers.is_empty() {
                    // failure already went to the error sink; the task stays queued
                    let _ = self.add_worker(&mut state, None);
                }
                return Ok(());
            }
            Err(task) => task,
        };

        if state.workers.len() < self.config.max_size {
            return self.start_with(state, task);
        }

        let ctx = RejectionContext {
            pool_size: state.workers.len(),
            max_size: self.config.max_size,
            queued: self.queue.len(),
            queue_capacity: self.queue.capacity(),
        };
        drop(state);
        self.reject(task, &ctx)
    }

    fn start_with(
        self: &Arc<Self>,
        mut state: parking_lot::MutexGuard<'_, PoolState>,
        task: Task,
    ) -> Result<()> {
        match self.add_worker(&mut state, Some(task)) {
            Ok(()) => Ok(()),
            Err((err, task)) => {
                drop(state);
                if let Some(task) = task {
                    task.reject(err.clone());
                }
                Err(err)
            }
        }
    }

    fn reject(&self, task: Task, ctx: &RejectionContext) -> Result<()> {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        match self.config.rejection_policy.decide(ctx) {
            RejectionAction::Reject => {
                tracing::warn!(
                    task = %task.id(),
                    pool_size = ctx.pool_size,
                    queued = ctx.queued,
                    "task rejected"
                );
                task.reject(Error::Rejected);
                Err(Error::Rejected)
            }
            RejectionAction::RunOnCaller => {
                if self.state.lock().run_state != RunState::Running {
                    task.reject(Error::Shutdown);
                    return Err(Error::Shutdown);
                }
                tracing::debug!(task = %task.id(), "pool saturated, running on caller");
                task.run();
                Ok(())
            }
            RejectionAction::EvictOldest => {
                let (evicted, rejected) = self.queue.replace_oldest(task);
                if let Some(old) = evicted {
                    tracing::debug!(task = %old.id(), "evicted oldest queued task");
                }
                if let Some(new) = rejected {
                    tracing::debug!(task = %new.id(), "no room after eviction, task dropped");
                }
                Ok(())
            }
            RejectionAction::Drop => {
                tracing::debug!(task = %task.id(), "pool saturated, task discarded");
                Ok(())
            }
        }
    }

    /// Next task for worker `id`, or `None` once it should exit. A worker
    /// that returns `None` has already been removed from the pool.
    pub(crate) fn next_task(&self, id: WorkerId) -> Option<Task> {
        let mut timed_out = false;
        loop {
            let timed = {
                let mut state = self.state.lock();
                if state.run_state != RunState::Running && self.queue.is_empty() {
                    state.workers.remove(&id);
                    return None;
                }

                let timed = self.config.allow_core_timeout
                    || state.workers.len() > self.config.core_size;
                if timed && timed_out && (state.workers.len() > 1 || self.queue.is_empty()) {
                    state.workers.remove(&id);
                    tracing::debug!(
                        worker = id,
                        pool_size = state.workers.len(),
                        "idle worker retired"
                    );
                    return None;
                }
                timed
            };

            let task = if timed {
                self.queue.poll(self.config.keep_alive)
            } else {
                self.queue.take()
            };
            match task {
                Some(task) => return Some(task),
                None => timed_out = timed,
            }
        }
    }

    /// A worker that dies before finishing a single task is not replaced.
    pub(crate) fn worker_exited(self: &Arc<Self>, id: WorkerId, panicked: bool, ran_task: bool) {
        let leftovers = {
            let mut state = self.state.lock();
            if state.workers.remove(&id).is_some() && panicked {
                let err = Error::executor(format!("worker {} died unexpectedly", id));
                self.config.report(&err);
                if !ran_task {
                    tracing::warn!(worker = id, "worker died before running a task, not replaced");
                } else if state.run_state == RunState::Running
                    && state.workers.len() < self.config.core_size.max(1)
                {
                    let _ = self.add_worker(&mut state, None);
                }
            }
            tracing::debug!(worker = id, pool_size = state.workers.len(), "worker exited");
            self.try_terminate(&mut state)
        };
        drop(leftovers);
    }

    /// Moves a drained pool to `Terminated`. Returns tasks that can no longer
    /// run; the caller drops them after releasing the lock.
    fn try_terminate(&self, state: &mut PoolState) -> Vec<Task> {
        if state.run_state != RunState::ShuttingDown || !state.workers.is_empty() {
            return Vec::new();
        }
        let leftovers = self.queue.drain();
        state.run_state = RunState::Terminated;
        self.terminated.notify_all();
        tracing::debug!("worker pool terminated");
        leftovers
    }

    pub(crate) fn shutdown(&self) {
        let leftovers = {
            let mut state = self.state.lock();
            if state.run_state == RunState::Running {
                state.run_state = RunState::ShuttingDown;
                self.queue.close();
                tracing::debug!(pool_size = state.workers.len(), "worker pool shutting down");
            }
            self.try_terminate(&mut state)
        };
        drop(leftovers);
    }

    fn shutdown_now(&self) -> Vec<TaskId> {
        let (drained, running) = {
            let mut state = self.state.lock();
            if state.run_state == RunState::Running {
                state.run_state = RunState::ShuttingDown;
                tracing::debug!(pool_size = state.workers.len(), "worker pool stopping");
            }
            self.queue.close();
            let mut drained = self.queue.drain();
            let running: Vec<Arc<dyn TaskControl>> = state
                .workers
                .values()
                .filter_map(|slot| slot.lock().clone())
                .collect();
            drained.extend(self.try_terminate(&mut state));
            (drained, running)
        };

        for task in &running {
            task.cancel();
        }
        drained.iter().map(Task::id).collect()
    }
}

struct ShutdownOnDrop(Arc<PoolInner>);

impl Drop for ShutdownOnDrop {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}

/// Elastic worker pool.
///
/// Keeps `core_size` workers, bursts up to `max_size` once the queue is full
/// and retires non-core workers after `keep_alive` of idleness. Cloning gives
/// another handle to the same pool; the pool shuts down (without waiting)
/// when the last handle is dropped.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    _guard: Arc<ShutdownOnDrop>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let queue = Arc::new(TaskQueue::new(config.queue_capacity));
        let inner = Arc::new(PoolInner {
            config,
            queue,
            state: Mutex::new(PoolState {
                run_state: RunState::Running,
                workers: HashMap::new(),
                largest: 0,
            }),
            terminated: Condvar::new(),
            next_worker_id: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        });

        tracing::debug!(
            core_size = inner.config.core_size,
            max_size = inner.config.max_size,
            queue_capacity = inner.config.queue_capacity,
            "worker pool created"
        );

        Ok(Self {
            _guard: Arc::new(ShutdownOnDrop(inner.clone())),
            inner,
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Submit a task. Panics inside `f` surface as [`Error::TaskFailed`] on
    /// the returned handle.
    pub fn submit<F, T>(&self, f: F) -> Result<ResultHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (handle, task) = self.prepare(move || Ok(f()));
        self.dispatch(task)?;
        Ok(handle)
    }

    /// Submit a task whose `Err` becomes [`Error::TaskFailed`].
    pub fn submit_fallible<F, T, E>(&self, f: F) -> Result<ResultHandle<T>>
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Display,
    {
        let (handle, task) = self.prepare(move || f().map_err(|e| Error::task_failed(e.to_string())));
        self.dispatch(task)?;
        Ok(handle)
    }

    /// Fire-and-forget submission.
    pub fn execute<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(f).map(|_| ())
    }

    /// Wrap `body` into a task and the handle observing it, without queueing.
    pub(crate) fn prepare<F, T>(&self, body: F) -> (ResultHandle<T>, Task)
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let handle = ResultHandle::new(Some(Arc::downgrade(&self.inner.queue)));
        let writer = handle.clone();
        let func = move || {
            let outcome = match panic_handler::guarded(body) {
                Ok(outcome) => outcome,
                Err(panic) => Err(Error::TaskFailed(panic.message)),
            };
            writer.complete(outcome);
        };
        let task = Task::new(Box::new(func), handle.control());
        (handle, task)
    }

    pub(crate) fn dispatch(&self, task: Task) -> Result<()> {
        self.inner.dispatch(task)
    }

    /// Start every missing core worker. Returns how many were started.
    pub fn prestart_core_workers(&self) -> usize {
        let mut state = self.inner.state.lock();
        let mut started = 0;
        while state.run_state == RunState::Running
            && state.workers.len() < self.inner.config.core_size
        {
            if self.inner.add_worker(&mut state, None).is_err() {
                break;
            }
            started += 1;
        }
        started
    }

    /// Remove cancelled tasks still sitting in the queue.
    pub fn purge(&self) -> usize {
        self.inner.queue.remove_cancelled().len()
    }

    /// Stop accepting work; queued tasks still run. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Stop accepting work, cancel queued tasks and request cancellation of
    /// running ones. Returns the ids of tasks that never started.
    pub fn shutdown_now(&self) -> Vec<TaskId> {
        self.inner.shutdown_now()
    }

    /// Block until terminated or `timeout` elapses. Must not be called from
    /// a task running on this pool.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = util::deadline(timeout);
        let mut state = self.inner.state.lock();
        while state.run_state != RunState::Terminated {
            let Some(deadline) = deadline else {
                self.inner.terminated.wait(&mut state);
                continue;
            };
            if self
                .inner
                .terminated
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.run_state == RunState::Terminated;
            }
        }
        true
    }

    pub fn run_state(&self) -> RunState {
        self.inner.state.lock().run_state
    }

    pub fn is_shutdown(&self) -> bool {
        self.run_state() != RunState::Running
    }

    pub fn is_terminated(&self) -> bool {
        self.run_state() == RunState::Terminated
    }

    pub fn pool_size(&self) -> usize {
        self.inner.state.lock().workers.len()
    }

    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn stats(&self) -> PoolStats {
        let (pool_size, largest_pool_size) = {
            let state = self.inner.state.lock();
            (state.workers.len(), state.largest)
        };
        PoolStats {
            pool_size,
            active: self.inner.active.load(Ordering::Relaxed),
            largest_pool_size,
            queued: self.inner.queue.len(),
            completed: self.inner.completed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            rejected: self.inner.rejected.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .field("run_state", &self.run_state())
            .finish()
    }
}
