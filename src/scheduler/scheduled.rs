use super::delay_queue::{DelayQueue, Job};
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::executor::panic_handler::guarded;
use crate::executor::{Cancellable, ResultHandle, TaskId, TaskStatus, WorkerPool};
use crate::sync::CountdownLatch;
use crate::util;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Period {
    FixedRate(Duration),
    FixedDelay(Duration),
}

impl Period {
    fn duration(self) -> Duration {
        match self {
            Period::FixedRate(period) | Period::FixedDelay(period) => period,
        }
    }
}

/// Next fire time for a fixed-rate task that was due at `scheduled`.
///
/// Ticks stay on the original `scheduled + k * period` grid. Missed ticks
/// are skipped, so an overrun fires at most once right away. `None` if the
/// next tick is past what `Instant` can represent.
pub(crate) fn next_fixed_rate(
    scheduled: Instant,
    period: Duration,
    now: Instant,
) -> Option<Instant> {
    let next = scheduled.checked_add(period)?;
    if next > now {
        return Some(next);
    }
    let behind = (now - scheduled).as_nanos() % period.as_nanos();
    match u64::try_from(behind) {
        Ok(ns) => Some(now - Duration::from_nanos(ns)),
        Err(_) => Some(now),
    }
}

pub(crate) struct PeriodicTask {
    handle: ResultHandle<()>,
    body: Mutex<Box<dyn FnMut() + Send>>,
    period: Period,
    runs: AtomicU64,
}

impl PeriodicTask {
    pub(crate) fn is_done(&self) -> bool {
        self.handle.is_done()
    }

    fn cancel(&self) -> bool {
        self.handle.cancel()
    }

    /// Runs the body once. `Ok(true)` means the task should be rescheduled.
    fn run_once(&self) -> Result<bool> {
        if self.is_done() {
            return Ok(false);
        }
        let outcome = {
            let mut body = self.body.lock();
            guarded(|| (&mut **body)())
        };
        match outcome {
            Ok(()) => {
                self.runs.fetch_add(1, Ordering::Relaxed);
                Ok(!self.is_done())
            }
            Err(panic) => {
                let err = Error::TaskFailed(panic.message);
                if self.handle.fail(err.clone()) {
                    return Err(err);
                }
                Ok(false)
            }
        }
    }
}

struct SchedulerInner {
    pool: WorkerPool,
    queue: DelayQueue,
    timer_done: CountdownLatch,
}

impl SchedulerInner {
    /// Forward a due periodic occurrence to the pool.
    fn fire(self: &Arc<Self>, task: Arc<PeriodicTask>, scheduled: Instant) {
        if task.is_done() {
            return;
        }

        let weak = Arc::downgrade(self);
        let occurrence_task = task.clone();
        let (occurrence, work) = self.pool.prepare(move || {
            run_periodic(weak, occurrence_task, scheduled);
            Ok(())
        });
        // discarded, evicted or cancelled by shutdown_now
        let watched = task.clone();
        occurrence.on_completion(move |done| {
            if done.status() == TaskStatus::Cancelled {
                watched.cancel();
            }
        });

        match self.pool.dispatch(work) {
            Ok(()) => {}
            Err(Error::Shutdown) => {
                task.cancel();
            }
            Err(err) => {
                tracing::warn!(
                    task = %task.handle.id(),
                    error = %err,
                    "periodic task could not be dispatched"
                );
                if task.handle.fail(err.clone()) {
                    self.pool.config().report(&err);
                }
            }
        }
    }

    fn reschedule(&self, task: Arc<PeriodicTask>, scheduled: Instant) {
        let now = Instant::now();
        let next = match task.period {
            Period::FixedRate(period) => next_fixed_rate(scheduled, period, now),
            Period::FixedDelay(delay) => now.checked_add(delay),
        };
        let Some(next) = next else {
            tracing::debug!(task = %task.handle.id(), "next run out of range, cancelling");
            task.cancel();
            return;
        };
        if let Err(Job::Periodic(task)) = self.queue.push(next, Job::Periodic(task)) {
            task.cancel();
        }
    }
}

fn run_periodic(scheduler: Weak<SchedulerInner>, task: Arc<PeriodicTask>, scheduled: Instant) {
    let outcome = task.run_once();
    let Some(inner) = scheduler.upgrade() else {
        task.cancel();
        return;
    };
    match outcome {
        Ok(true) => inner.reschedule(task, scheduled),
        Ok(false) => {}
        Err(err) => {
            tracing::warn!(
                task = %task.handle.id(),
                error = %err,
                "periodic task failed, later runs suppressed"
            );
            inner.pool.config().report(&err);
        }
    }
}

/// Exit bookkeeping for the timer thread: once nothing is left to fire the
/// pool is shut down.
struct TimerExit(Arc<SchedulerInner>);

impl Drop for TimerExit {
    fn drop(&mut self) {
        self.0.pool.shutdown();
        self.0.timer_done.count_down();
        tracing::debug!("scheduler timer exited");
    }
}

fn timer_loop(inner: Arc<SchedulerInner>) {
    let _exit = TimerExit(inner.clone());
    while let Some(item) = inner.queue.next_due() {
        match item.job {
            Job::Once(task) => {
                if task.is_cancelled() {
                    continue;
                }
                let id = task.id();
                if let Err(err) = inner.pool.dispatch(task) {
                    tracing::debug!(task = %id, error = %err, "delayed task not accepted");
                }
            }
            Job::Periodic(task) => inner.fire(task, item.due),
        }
    }
}

/// Worker pool with delayed and periodic submission.
///
/// A dedicated timer thread keeps due items in a min-heap and forwards each
/// one to the pool as its time comes. Periodic runs of one task never
/// overlap: the next occurrence is queued only after the previous one
/// finished.
pub struct ScheduledExecutor {
    inner: Arc<SchedulerInner>,
}

impl ScheduledExecutor {
    pub fn new(config: PoolConfig) -> Result<Self> {
        let timer_name = format!("{}-timer", config.thread_name_prefix);
        let pool = WorkerPool::new(config)?;
        let inner = Arc::new(SchedulerInner {
            pool,
            queue: DelayQueue::new(),
            timer_done: CountdownLatch::new(1),
        });

        let timer = inner.clone();
        thread::Builder::new()
            .name(timer_name)
            .spawn(move || timer_loop(timer))
            .map_err(|e| {
                let err = Error::executor(format!("timer spawn failed: {}", e));
                inner.pool.config().report(&err);
                inner.pool.shutdown();
                err
            })?;

        Ok(Self { inner })
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    /// Run `f` once after `delay`.
    pub fn schedule_once<F, T>(&self, f: F, delay: Duration) -> Result<ResultHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let due = util::deadline(delay).ok_or_else(|| Error::config("delay is too large"))?;
        let (handle, task) = self.inner.pool.prepare(move || Ok(f()));
        if let Err(job) = self.inner.queue.push(due, Job::Once(task)) {
            drop(job);
            return Err(Error::Shutdown);
        }
        tracing::trace!(task = %handle.id(), ?delay, "scheduled once");
        Ok(handle)
    }

    /// Run `f` every `period`, first after `initial_delay`. Fire times stay
    /// on the original grid regardless of how long each run takes.
    pub fn schedule_at_fixed_rate<F>(
        &self,
        f: F,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<PeriodicHandle>
    where
        F: FnMut() + Send + 'static,
    {
        if period.is_zero() {
            return Err(Error::config("period must be > 0"));
        }
        self.schedule_periodic(Box::new(f), initial_delay, Period::FixedRate(period))
    }

    /// Run `f` repeatedly with `delay` between the end of one run and the
    /// start of the next.
    pub fn schedule_with_fixed_delay<F>(
        &self,
        f: F,
        initial_delay: Duration,
        delay: Duration,
    ) -> Result<PeriodicHandle>
    where
        F: FnMut() + Send + 'static,
    {
        if delay.is_zero() {
            return Err(Error::config("delay must be > 0"));
        }
        self.schedule_periodic(Box::new(f), initial_delay, Period::FixedDelay(delay))
    }

    fn schedule_periodic(
        &self,
        body: Box<dyn FnMut() + Send>,
        initial_delay: Duration,
        period: Period,
    ) -> Result<PeriodicHandle> {
        // the second run must be representable too
        let due = util::deadline(initial_delay)
            .filter(|due| due.checked_add(period.duration()).is_some())
            .ok_or_else(|| Error::config("delay is too large"))?;
        let task = Arc::new(PeriodicTask {
            handle: ResultHandle::new(None),
            body: Mutex::new(body),
            period,
            runs: AtomicU64::new(0),
        });
        if self
            .inner
            .queue
            .push(due, Job::Periodic(task.clone()))
            .is_err()
        {
            task.cancel();
            return Err(Error::Shutdown);
        }
        tracing::trace!(task = %task.handle.id(), ?period, "scheduled periodic");
        Ok(PeriodicHandle { task })
    }

    /// Immediate submission, bypassing the timer.
    pub fn submit<F, T>(&self, f: F) -> Result<ResultHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_shutdown() {
            return Err(Error::Shutdown);
        }
        self.inner.pool.submit(f)
    }

    /// Drop cancelled items still waiting for their fire time.
    pub fn purge(&self) -> usize {
        let gone = self.inner.queue.remove_cancelled();
        gone.len()
    }

    /// Items waiting for their fire time.
    pub fn scheduled(&self) -> usize {
        self.inner.queue.len()
    }

    /// Cancel periodic tasks and stop accepting new ones. Delayed one-shot
    /// tasks still fire; the pool shuts down after the last of them.
    pub fn shutdown(&self) {
        let periodic = self.inner.queue.shutdown();
        for task in &periodic {
            task.cancel();
        }
        tracing::debug!(cancelled = periodic.len(), "scheduled executor shutting down");
    }

    /// Cancel everything, scheduled or queued, and request cancellation of
    /// running tasks. Returns the ids of tasks that never started.
    pub fn shutdown_now(&self) -> Vec<TaskId> {
        let mut never_ran = Vec::new();
        for job in self.inner.queue.shutdown_now() {
            match job {
                Job::Once(task) => never_ran.push(task.id()),
                Job::Periodic(task) => {
                    task.cancel();
                }
            }
        }
        never_ran.extend(self.inner.pool.shutdown_now());
        never_ran
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.queue.is_shutdown()
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.timer_done.is_open() && self.inner.pool.is_terminated()
    }

    /// Block until the timer has exited and the pool has terminated, or
    /// `timeout` elapses.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = util::deadline(timeout);
        if !self.inner.timer_done.wait_timeout(timeout) {
            return false;
        }
        let remaining = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => timeout,
        };
        self.inner.pool.await_termination(remaining)
    }
}

impl Drop for ScheduledExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ScheduledExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledExecutor")
            .field("pool", &self.inner.pool)
            .field("scheduled", &self.inner.queue.len())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Handle to a periodic task.
///
/// The task stays `Pending` between runs and only reaches a terminal state
/// when it is cancelled or one of its runs panics.
#[derive(Clone)]
pub struct PeriodicHandle {
    task: Arc<PeriodicTask>,
}

impl PeriodicHandle {
    pub fn id(&self) -> TaskId {
        self.task.handle.id()
    }

    pub fn status(&self) -> TaskStatus {
        self.task.handle.status()
    }

    /// Runs that finished without panicking.
    pub fn run_count(&self) -> u64 {
        self.task.runs.load(Ordering::Relaxed)
    }

    pub fn is_done(&self) -> bool {
        self.task.is_done()
    }

    /// Block until the task is cancelled or fails.
    pub fn wait(&self) {
        self.task.handle.wait();
    }

    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.task.handle.wait_timeout(timeout)
    }

    /// Block until the task stops and return why: `Cancelled`, or the
    /// failure of the run that stopped it.
    pub fn join(&self) -> Result<()> {
        self.task.handle.join()
    }
}

impl Cancellable for PeriodicHandle {
    fn cancel(&self) -> bool {
        self.task.cancel()
    }

    fn is_cancelled(&self) -> bool {
        self.task.handle.is_cancelled()
    }
}

impl std::fmt::Debug for PeriodicHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicHandle")
            .field("id", &self.id())
            .field("status", &self.status())
            .field("period", &self.task.period)
            .field("runs", &self.run_count())
            .finish()
    }
}
