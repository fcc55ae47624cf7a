use crate::error::{Error, Result};
use crate::executor::RejectionPolicy;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on live workers accepted by [`PoolConfig::validate`].
pub const MAX_WORKERS: usize = 1024;

/// Callback receiving engine-internal failures (e.g. a worker thread that could not be spawned).
pub type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

#[derive(Clone)]
pub struct PoolConfig {
    pub core_size: usize,
    pub max_size: usize,
    pub queue_capacity: usize,
    pub keep_alive: Duration,
    pub rejection_policy: RejectionPolicy,
    pub allow_core_timeout: bool,
    pub stack_size: Option<usize>,
    pub thread_name_prefix: String,
    pub error_handler: Option<ErrorHandler>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            core_size: num_cpus,
            max_size: num_cpus,
            queue_capacity: 1024,
            keep_alive: Duration::from_secs(60),
            rejection_policy: RejectionPolicy::default(),
            allow_core_timeout: false,
            stack_size: Some(2 * 1024 * 1024),
            thread_name_prefix: "veda-worker".to_string(),
            error_handler: None,
        }
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("core_size", &self.core_size)
            .field("max_size", &self.max_size)
            .field("queue_capacity", &self.queue_capacity)
            .field("keep_alive", &self.keep_alive)
            .field("rejection_policy", &self.rejection_policy)
            .field("allow_core_timeout", &self.allow_core_timeout)
            .field("stack_size", &self.stack_size)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("error_handler", &self.error_handler.is_some())
            .finish()
    }
}

impl PoolConfig {
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }

    /// `n` workers that never retire, backed by the default queue.
    pub fn fixed(n: usize) -> Self {
        Self {
            core_size: n,
            max_size: n,
            ..Default::default()
        }
    }

    /// Bursts from `core` up to `max` workers once `capacity` items are queued.
    pub fn elastic(core: usize, max: usize, capacity: usize) -> Self {
        Self {
            core_size: core,
            max_size: max,
            queue_capacity: capacity,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::config("max_size must be > 0"));
        }
        if self.max_size > MAX_WORKERS {
            return Err(Error::config(format!(
                "max_size too large (max {})",
                MAX_WORKERS
            )));
        }
        if self.core_size > self.max_size {
            return Err(Error::config(format!(
                "core_size ({}) must not exceed max_size ({})",
                self.core_size, self.max_size
            )));
        }
        if self.allow_core_timeout && self.keep_alive.is_zero() {
            return Err(Error::config(
                "keep_alive must be > 0 when core workers may time out",
            ));
        }
        Ok(())
    }

    /// Report an engine-internal failure to the configured sink.
    pub(crate) fn report(&self, err: &Error) {
        match &self.error_handler {
            Some(handler) => handler(err),
            None => tracing::error!(error = %err, "worker pool internal failure"),
        }
    }
}

#[derive(Debug, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
        }
    }

    pub fn core_size(mut self, n: usize) -> Self {
        self.config.core_size = n;
        self
    }

    pub fn max_size(mut self, n: usize) -> Self {
        self.config.max_size = n;
        self
    }

    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.config.queue_capacity = n;
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.config.keep_alive = keep_alive;
        self
    }

    pub fn rejection_policy(mut self, policy: RejectionPolicy) -> Self {
        self.config.rejection_policy = policy;
        self
    }

    pub fn allow_core_timeout(mut self, allow: bool) -> Self {
        self.config.allow_core_timeout = allow;
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.config.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<PoolConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_validates() {
        let err = PoolConfig::builder()
            .core_size(4)
            .max_size(2)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        assert!(PoolConfig::builder().max_size(0).core_size(0).build().is_err());
        assert!(PoolConfig::builder()
            .core_size(0)
            .max_size(MAX_WORKERS + 1)
            .build()
            .is_err());
    }

    #[test]
    fn test_zero_core_and_zero_capacity_are_legal() {
        let config = PoolConfig::builder()
            .core_size(0)
            .max_size(3)
            .queue_capacity(0)
            .build()
            .unwrap();
        assert_eq!(config.core_size, 0);
        assert_eq!(config.queue_capacity, 0);
    }

    #[test]
    fn test_core_timeout_needs_keep_alive() {
        let result = PoolConfig::builder()
            .core_size(1)
            .max_size(1)
            .keep_alive(Duration::ZERO)
            .allow_core_timeout(true)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_presets() {
        let fixed = PoolConfig::fixed(3);
        assert_eq!((fixed.core_size, fixed.max_size), (3, 3));
        assert!(fixed.validate().is_ok());

        let elastic = PoolConfig::elastic(2, 4, 2);
        assert_eq!(elastic.queue_capacity, 2);
        assert!(elastic.validate().is_ok());
    }

    #[test]
    fn test_error_handler_receives_reports() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        let config = PoolConfig::builder()
            .error_handler(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        config.report(&Error::executor("boom"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
