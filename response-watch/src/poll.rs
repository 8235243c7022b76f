//! Deadline and cancellation handling shared by the polling loops.
//!
//! Every strategy is a single sleep-between-polls loop. Suspension only
//! happens in [`PollClock::sleep`], so cancellation is observed within one
//! poll interval.

use crate::types::WatchError;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Wall-clock deadline for one wait, tied to a cancellation token
#[derive(Debug, Clone)]
pub struct PollClock {
    started: Instant,
    timeout: Duration,
    cancel: CancellationToken,
}

impl PollClock {
    /// Start the clock now
    pub fn start(timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            started: Instant::now(),
            timeout,
            cancel,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left before the deadline
    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed() >= self.timeout
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Error describing where the wait stopped
    pub fn timeout_error(&self) -> WatchError {
        WatchError::Timeout {
            elapsed: self.elapsed(),
        }
    }

    /// Fails once the deadline has passed or the token was cancelled.
    pub fn check(&self) -> Result<(), WatchError> {
        if self.is_cancelled() || self.is_expired() {
            return Err(self.timeout_error());
        }
        Ok(())
    }

    /// Sleep for `duration`, waking early on cancellation.
    ///
    /// Cancellation is reported as a timeout; the caller never resumes.
    pub async fn sleep(&self, duration: Duration) -> Result<(), WatchError> {
        if duration.is_zero() {
            return self.check_cancelled();
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancel.cancelled() => Err(self.timeout_error()),
        }
    }

    fn check_cancelled(&self) -> Result<(), WatchError> {
        if self.is_cancelled() {
            Err(self.timeout_error())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_check_passes_before_deadline() {
        let clock = PollClock::start(Duration::from_secs(5), CancellationToken::new());
        assert!(clock.check().is_ok());
        assert!(clock.remaining() > Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_check_fails_after_deadline() {
        let clock = PollClock::start(Duration::from_millis(10), CancellationToken::new());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(clock.check().unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn test_sleep_wakes_on_cancel() {
        let token = CancellationToken::new();
        let clock = PollClock::start(Duration::from_secs(60), token.clone());

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let result = clock.sleep(Duration::from_secs(30)).await;
        assert!(result.unwrap_err().is_timeout());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
