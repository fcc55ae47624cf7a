pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("task rejected: pool and queue are saturated")]
    Rejected,

    #[error("task failed: {0}")]
    TaskFailed(String),

    #[error("operation timed out")]
    Timeout,

    #[error("barrier is broken")]
    BrokenBarrier,

    #[error("task was cancelled")]
    Cancelled,

    #[error("executor is shut down")]
    Shutdown,

    #[error("config error: {0}")]
    Config(String),

    #[error("executor error: {0}")]
    Executor(String),

    #[error("result was already retrieved")]
    AlreadyRetrieved,
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn executor<S: Into<String>>(msg: S) -> Self {
        Error::Executor(msg.into())
    }

    pub fn task_failed<S: Into<String>>(msg: S) -> Self {
        Error::TaskFailed(msg.into())
    }

    /// True for errors produced by the task body rather than by the engine.
    pub fn is_task_failure(&self) -> bool {
        matches!(self, Error::TaskFailed(_))
    }
}
