//! Cooperative cancellation shared by every worker of a run
//!
//! One [`StopSignal`] is created per run. Workers check it at attempt and
//! target boundaries and sleep through [`StopSignal::sleep`], which returns as
//! soon as the signal fires instead of waiting out the full duration.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Result of an interruptible sleep
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pause {
    Elapsed,
    Interrupted,
}

impl Pause {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Pause::Interrupted)
    }
}

/// Shared, clonable stop flag with interruptible sleeps
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request a stop. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal has been triggered
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on a trigger.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Sleep for `duration` unless the signal fires first
    pub async fn sleep(&self, duration: Duration) -> Pause {
        if self.is_stopped() {
            return Pause::Interrupted;
        }
        if duration.is_zero() {
            return Pause::Elapsed;
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => Pause::Elapsed,
            _ = self.stopped() => Pause::Interrupted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_sleep_elapses_without_trigger() {
        let signal = StopSignal::new();
        let pause = signal.sleep(Duration::from_millis(20)).await;
        assert_eq!(pause, Pause::Elapsed);
        assert!(!signal.is_stopped());
    }

    #[tokio::test]
    async fn test_trigger_interrupts_long_sleep() {
        let signal = StopSignal::new();
        let sleeper = signal.clone();
        let start = Instant::now();

        let handle = tokio::spawn(async move { sleeper.sleep(Duration::from_secs(30)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.trigger();

        let pause = handle.await.unwrap();
        assert!(pause.is_interrupted());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_sleep_after_trigger_returns_immediately() {
        let signal = StopSignal::new();
        signal.trigger();
        signal.trigger();
        assert!(signal.sleep(Duration::from_secs(30)).await.is_interrupted());
    }
}
