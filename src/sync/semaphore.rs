use crate::util;
use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Counting semaphore.
///
/// Permits are not owned by whoever acquired them: `release` without a
/// matching `acquire` is legal and simply raises the count.
#[derive(Debug)]
pub struct Semaphore {
    permits: Mutex<usize>,
    released: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            released: Condvar::new(),
        }
    }

    /// Block until `n` permits are available, then take them all at once.
    pub fn acquire(&self, n: usize) {
        let mut permits = self.permits.lock();
        while *permits < n {
            self.released.wait(&mut permits);
        }
        *permits -= n;
    }

    pub fn acquire_timeout(&self, n: usize, timeout: Duration) -> bool {
        let deadline = match util::deadline(timeout) {
            Some(deadline) => deadline,
            None => {
                self.acquire(n);
                return true;
            }
        };
        let mut permits = self.permits.lock();
        while *permits < n {
            if self.released.wait_until(&mut permits, deadline).timed_out() {
                break;
            }
        }
        if *permits < n {
            return false;
        }
        *permits -= n;
        true
    }

    pub fn try_acquire(&self, n: usize) -> bool {
        let mut permits = self.permits.lock();
        if *permits < n {
            return false;
        }
        *permits -= n;
        true
    }

    pub fn release(&self, n: usize) {
        if n == 0 {
            return;
        }
        let mut permits = self.permits.lock();
        *permits = permits.saturating_add(n);
        // waiters may want different amounts
        self.released.notify_all();
    }

    pub fn available_permits(&self) -> usize {
        *self.permits.lock()
    }

    /// Take every available permit, returning how many were taken.
    pub fn drain_permits(&self) -> usize {
        std::mem::take(&mut *self.permits.lock())
    }

    /// Acquire `n` permits held until the guard drops.
    pub fn access(&self, n: usize) -> SemaphoreGuard<'_> {
        self.acquire(n);
        SemaphoreGuard {
            semaphore: self,
            permits: n,
        }
    }
}

#[derive(Debug)]
pub struct SemaphoreGuard<'a> {
    semaphore: &'a Semaphore,
    permits: usize,
}

impl SemaphoreGuard<'_> {
    pub fn permits(&self) -> usize {
        self.permits
    }
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        self.semaphore.release(self.permits);
    }
}
