//! Blocking coordination primitives.
//!
//! These are independent of the pool and can be shared between tasks and
//! ordinary threads alike.

pub mod barrier;
pub mod latch;
pub mod semaphore;

pub use barrier::{BarrierWaitResult, CyclicBarrier};
pub use latch::CountdownLatch;
pub use semaphore::{Semaphore, SemaphoreGuard};
