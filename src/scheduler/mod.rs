//! Delayed and periodic task scheduling.
//!
//! A [`ScheduledExecutor`] owns a [`WorkerPool`](crate::executor::WorkerPool)
//! plus a timer thread. The timer keeps pending items in a min-heap keyed by
//! due time and forwards each one to the pool when it comes due.

pub(crate) mod delay_queue;
pub mod scheduled;

pub use scheduled::{PeriodicHandle, ScheduledExecutor};
