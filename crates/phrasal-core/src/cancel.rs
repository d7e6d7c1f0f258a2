//! Cooperative cancellation
//!
//! Generation checks a [`Cancellation`] at every utterance boundary. Clones
//! share the same flag, so one handle can stop every worker of a run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Shared cancellation flag with an optional deadline
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// A handle that only trips when [`cancel`](Self::cancel) is called
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that also trips once `timeout` has elapsed
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A handle that also trips at `deadline`
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested or the deadline has passed
    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::Relaxed) {
            return true;
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.flag.store(true, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let cancellation = Cancellation::new();
        let other = cancellation.clone();
        assert!(!other.is_cancelled());
        cancellation.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_past_deadline_is_cancelled() {
        let cancellation = Cancellation::with_timeout(Duration::ZERO);
        assert!(cancellation.is_cancelled());
    }

    #[test]
    fn test_future_deadline_is_not_cancelled() {
        let cancellation = Cancellation::with_timeout(Duration::from_secs(3600));
        assert!(!cancellation.is_cancelled());
    }
}
