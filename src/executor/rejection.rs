use std::fmt;
use std::sync::Arc;

/// Snapshot of the pool handed to a rejection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RejectionContext {
    pub pool_size: usize,
    pub max_size: usize,
    pub queued: usize,
    pub queue_capacity: usize,
}

/// What the pool does with a task it could neither queue nor hand to a new worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionAction {
    /// Fail the submission.
    Reject,
    /// Run the task on the submitting thread.
    RunOnCaller,
    /// Drop the oldest queued task, then enqueue.
    EvictOldest,
    /// Drop the new task.
    Drop,
}

/// Strategy applied when the pool is saturated.
#[derive(Clone, Default)]
pub enum RejectionPolicy {
    #[default]
    Abort,
    CallerRuns,
    DiscardOldest,
    Discard,
    Custom(Arc<dyn Fn(&RejectionContext) -> RejectionAction + Send + Sync>),
}

impl RejectionPolicy {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&RejectionContext) -> RejectionAction + Send + Sync + 'static,
    {
        RejectionPolicy::Custom(Arc::new(f))
    }

    /// Pure decision for a saturated pool. Only consulted while the pool is
    /// running; submissions after shutdown fail before reaching a policy.
    pub fn decide(&self, ctx: &RejectionContext) -> RejectionAction {
        match self {
            RejectionPolicy::Abort => RejectionAction::Reject,
            RejectionPolicy::CallerRuns => RejectionAction::RunOnCaller,
            RejectionPolicy::DiscardOldest => RejectionAction::EvictOldest,
            RejectionPolicy::Discard => RejectionAction::Drop,
            RejectionPolicy::Custom(f) => f(ctx),
        }
    }
}

impl fmt::Debug for RejectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionPolicy::Abort => f.write_str("Abort"),
            RejectionPolicy::CallerRuns => f.write_str("CallerRuns"),
            RejectionPolicy::DiscardOldest => f.write_str("DiscardOldest"),
            RejectionPolicy::Discard => f.write_str("Discard"),
            RejectionPolicy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
