use crate::error::{Error, Result};
use crate::executor::panic_handler::guarded;
use crate::util;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

type BarrierAction = Box<dyn Fn() + Send + Sync>;

/// Outcome of a successful [`CyclicBarrier::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierWaitResult {
    /// Order in which this party arrived, starting at 0.
    pub arrival_index: usize,
    /// True for the last arriver, which ran the trip action.
    pub is_leader: bool,
}

struct State {
    arrived: usize,
    generation: u64,
    broken: Option<u64>,
    // the leader is running the action outside the lock
    tripping: bool,
}

/// Reusable rendezvous for a fixed number of parties.
///
/// When the last party arrives the optional action runs once on that
/// thread, then every waiter is released and the barrier moves on to the
/// next generation. A timeout, a panicking action, or a `reset` while
/// parties are waiting breaks the current generation; waiters from a broken
/// generation get [`Error::BrokenBarrier`], and so does every later `wait`
/// until `reset` is called.
pub struct CyclicBarrier {
    parties: usize,
    action: Option<BarrierAction>,
    state: Mutex<State>,
    cond: Condvar,
}

impl CyclicBarrier {
    /// A barrier for `parties` threads. Zero is treated as one.
    pub fn new(parties: usize) -> Self {
        Self::build(parties, None)
    }

    pub fn with_action<F>(parties: usize, action: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::build(parties, Some(Box::new(action)))
    }

    fn build(parties: usize, action: Option<BarrierAction>) -> Self {
        Self {
            parties: parties.max(1),
            action,
            state: Mutex::new(State {
                arrived: 0,
                generation: 0,
                broken: None,
                tripping: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn wait(&self) -> Result<BarrierWaitResult> {
        self.arrive(None)
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Result<BarrierWaitResult> {
        self.arrive(util::deadline(timeout))
    }

    fn arrive(&self, mut deadline: Option<Instant>) -> Result<BarrierWaitResult> {
        let mut state = self.state.lock();

        // late arrivals for the next generation hold off until the trip ends
        while state.tripping {
            if self.block(&mut state, deadline) {
                return Err(Error::Timeout);
            }
        }

        let generation = state.generation;
        if state.broken == Some(generation) {
            return Err(Error::BrokenBarrier);
        }

        let arrival_index = state.arrived;
        state.arrived += 1;

        if state.arrived == self.parties {
            return self.trip(state, arrival_index);
        }

        loop {
            let timed_out = self.block(&mut state, deadline);

            if state.broken == Some(generation) {
                return Err(Error::BrokenBarrier);
            }
            if state.generation != generation {
                return Ok(BarrierWaitResult {
                    arrival_index,
                    is_leader: false,
                });
            }
            if timed_out && state.tripping {
                // every party is in; the trip only waits on the action now
                deadline = None;
                continue;
            }
            if timed_out {
                tracing::debug!(generation, "barrier wait timed out");
                self.break_generation(&mut state);
                return Err(Error::Timeout);
            }
        }
    }

    fn trip(
        &self,
        mut state: MutexGuard<'_, State>,
        arrival_index: usize,
    ) -> Result<BarrierWaitResult> {
        let generation = state.generation;

        if let Some(action) = &self.action {
            state.tripping = true;
            let outcome = MutexGuard::unlocked(&mut state, || guarded(|| action()));
            state.tripping = false;

            if outcome.is_err() {
                if state.generation == generation {
                    self.break_generation(&mut state);
                } else {
                    self.cond.notify_all();
                }
                return Err(Error::BrokenBarrier);
            }
            // broken or reset while the action ran
            if state.generation != generation || state.broken == Some(generation) {
                self.cond.notify_all();
                return Err(Error::BrokenBarrier);
            }
        }

        state.arrived = 0;
        state.generation += 1;
        self.cond.notify_all();
        Ok(BarrierWaitResult {
            arrival_index,
            is_leader: true,
        })
    }

    /// Returns true if the deadline passed.
    fn block(&self, state: &mut MutexGuard<'_, State>, deadline: Option<Instant>) -> bool {
        match deadline {
            Some(deadline) => self.cond.wait_until(state, deadline).timed_out(),
            None => {
                self.cond.wait(state);
                false
            }
        }
    }

    fn break_generation(&self, state: &mut State) {
        state.broken = Some(state.generation);
        state.arrived = 0;
        self.cond.notify_all();
    }

    /// Break the current generation, if anyone is waiting, and start a
    /// fresh one.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.broken = Some(state.generation);
        state.generation += 1;
        state.arrived = 0;
        self.cond.notify_all();
    }

    pub fn is_broken(&self) -> bool {
        let state = self.state.lock();
        state.broken == Some(state.generation)
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    pub fn number_waiting(&self) -> usize {
        self.state.lock().arrived
    }
}

impl std::fmt::Debug for CyclicBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CyclicBarrier")
            .field("parties", &self.parties)
            .field("waiting", &state.arrived)
            .field("generation", &state.generation)
            .field("has_action", &self.action.is_some())
            .finish()
    }
}
