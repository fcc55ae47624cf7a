//! veda-exec - bounded worker pools and coordination primitives
//!
//! A thread-based task execution engine: an elastic worker pool in front of
//! a bounded FIFO queue, pluggable rejection policies, delayed and periodic
//! scheduling, completion-order result retrieval, and the classic blocking
//! coordination primitives.
//!
//! # Quick Start
//!
//! ```no_run
//! use veda_exec::prelude::*;
//!
//! let pool = WorkerPool::new(PoolConfig::elastic(2, 4, 16)).unwrap();
//!
//! let handle = pool.submit(|| (1..=10).sum::<u32>()).unwrap();
//! assert_eq!(handle.join().unwrap(), 55);
//!
//! pool.shutdown();
//! pool.await_termination(std::time::Duration::from_secs(1));
//! ```
//!
//! # Features
//!
//! - **Elastic Pool**: `core_size` resident workers, bursting to `max_size`
//!   once the queue is full, idle extras retired after `keep_alive`
//! - **Rejection Policies**: abort, caller-runs, discard, discard-oldest or custom
//! - **Result Handles**: blocking join with timeout and cooperative cancellation
//! - **Scheduling**: one-shot delays, fixed-rate and fixed-delay periodic tasks
//! - **Completion Tracking**: take results in the order tasks finish
//! - **Coordination**: countdown latch, cyclic barrier, counting semaphore

#![warn(missing_debug_implementations)]

pub mod config;
pub mod error;
pub mod executor;
pub mod prelude;
pub mod scheduler;
pub mod sync;

mod util;

pub use config::{PoolConfig, PoolConfigBuilder};
pub use error::{Error, Result};
pub use executor::{
    cancellation_requested, Cancellable, CompletionTracker, PoolStats, RejectionPolicy,
    ResultHandle, TaskStatus, WorkerPool,
};
pub use scheduler::{PeriodicHandle, ScheduledExecutor};
pub use sync::{CountdownLatch, CyclicBarrier, Semaphore};
