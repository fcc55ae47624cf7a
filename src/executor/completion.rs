//! Results delivered in the order tasks finish.

use super::handle::ResultHandle;
use super::pool::WorkerPool;
use crate::error::{Error, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::fmt::Display;
use std::time::Duration;

/// Submits tasks to a pool and hands their handles back as they finish.
///
/// Each tracked handle is pushed onto an internal unbounded channel right
/// after its terminal transition, so `take` only ever returns finished
/// handles. Cancelled tracked tasks are delivered too.
pub struct CompletionTracker<T> {
    pool: WorkerPool,
    tx: Sender<ResultHandle<T>>,
    rx: Receiver<ResultHandle<T>>,
}

impl<T: Send + 'static> CompletionTracker<T> {
    pub fn new(pool: WorkerPool) -> Self {
        let (tx, rx) = unbounded();
        Self { pool, tx, rx }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn submit_tracked<F>(&self, f: F) -> Result<ResultHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        self.track(move || Ok(f()))
    }

    pub fn submit_tracked_fallible<F, E>(&self, f: F) -> Result<ResultHandle<T>>
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        E: Display,
    {
        self.track(move || f().map_err(|e| Error::task_failed(e.to_string())))
    }

    fn track<F>(&self, body: F) -> Result<ResultHandle<T>>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (handle, task) = self.pool.prepare(body);
        let tx = self.tx.clone();
        handle.on_completion(move |done| {
            // the receiver lives as long as the tracker
            let _ = tx.send(done);
        });
        self.pool.dispatch(task)?;
        Ok(handle)
    }

    /// Block until a tracked task finishes.
    ///
    /// Blocks forever if nothing tracked is outstanding.
    pub fn take(&self) -> Result<ResultHandle<T>> {
        self.rx.recv().map_err(|_| Error::Shutdown)
    }

    /// Wait up to `timeout` for a finished task.
    pub fn poll(&self, timeout: Duration) -> Option<ResultHandle<T>> {
        match self.rx.recv_timeout(timeout) {
            Ok(handle) => Some(handle),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_take(&self) -> Option<ResultHandle<T>> {
        self.rx.try_recv().ok()
    }

    /// Finished handles not yet taken.
    pub fn ready(&self) -> usize {
        self.rx.len()
    }
}

impl<T> std::fmt::Debug for CompletionTracker<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionTracker")
            .field("pool", &self.pool)
            .field("ready", &self.rx.len())
            .finish()
    }
}
