use std::time::{Duration, Instant};

/// Instant `timeout` from now, or `None` when it lies beyond what `Instant`
/// can represent. Callers treat `None` as "no deadline".
pub(crate) fn deadline(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_overflow_is_none() {
        assert!(deadline(Duration::MAX).is_none());
        let soon = deadline(Duration::from_millis(5)).unwrap();
        assert!(soon > Instant::now() - Duration::from_millis(1));
    }
}
