pub use crate::config::{PoolConfig, PoolConfigBuilder};
pub use crate::error::{Error, Result};
pub use crate::executor::{
    cancellation_requested, Cancellable, CompletionTracker, PoolStats, RejectionAction,
    RejectionContext, RejectionPolicy, ResultHandle, RunState, TaskId, TaskStatus, WorkerPool,
};
pub use crate::scheduler::{PeriodicHandle, ScheduledExecutor};
pub use crate::sync::{BarrierWaitResult, CountdownLatch, CyclicBarrier, Semaphore};
