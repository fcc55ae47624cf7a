use crate::util;
use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// One-shot countdown latch.
///
/// Once the count reaches zero the latch stays open: every current and
/// future `wait` returns immediately and further `count_down` calls are
/// no-ops.
#[derive(Debug)]
pub struct CountdownLatch {
    count: Mutex<usize>,
    zero: Condvar,
}

impl CountdownLatch {
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            zero: Condvar::new(),
        }
    }

    pub fn count_down(&self) {
        let mut count = self.count.lock();
        if *count == 0 {
            return;
        }
        *count -= 1;
        if *count == 0 {
            self.zero.notify_all();
        }
    }

    /// Current count.
    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    pub fn is_open(&self) -> bool {
        self.count() == 0
    }

    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.zero.wait(&mut count);
        }
    }

    /// Returns false if the latch is still closed after `timeout`. The count
    /// is left untouched either way.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = match util::deadline(timeout) {
            Some(deadline) => deadline,
            None => {
                self.wait();
                return true;
            }
        };
        let mut count = self.count.lock();
        while *count > 0 {
            if self.zero.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}
