use std::time::{Duration, Instant};

/// Monotonic deadline, used to bound the handshake read loop
/// and to turn an optional `Option<Duration>` API argument into something
/// `Condvar::wait_timeout_while` can consume incrementally.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    pub fn new(limit: Option<Duration>) -> Self {
        Self {
            start: Instant::now(),
            limit,
        }
    }

    /// Time elapsed since this deadline was created.
    pub fn passed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time remaining until the limit, or `None` if unbounded.
    ///
    /// Never returns a negative `Duration` (the type can't represent one)
    /// — callers that need to know "how far past the deadline are we"
    /// should use `timed_out` instead.
    pub fn left(&self) -> Option<Duration> {
        self.limit.map(|limit| limit.saturating_sub(self.passed()))
    }

    /// True once the limit has been reached or exceeded. Always false for an
    /// unbounded deadline.
    pub fn timed_out(&self) -> bool {
        match self.limit {
            None => false,
            Some(limit) => self.passed() >= limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_never_times_out() {
        let d = Deadline::new(None);
        assert_eq!(d.left(), None);
        assert!(!d.timed_out());
    }

    #[test]
    fn bounded_reports_remaining_then_expires() {
        let d = Deadline::new(Some(Duration::from_millis(20)));
        assert!(!d.timed_out());
        assert!(d.left().unwrap() <= Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(30));
        assert!(d.timed_out());
        assert_eq!(d.left(), Some(Duration::ZERO));
    }
}
