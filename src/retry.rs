//! Bounded retries with jittered backoff and server-imposed cooldowns
//!
//! [`RetryPolicy::execute`] turns a channel's single-shot
//! [`AttemptOutcome`]s into one [`ActionResult`]. Transient failures consume
//! the attempt budget and back off for a random delay; cooldowns are waited
//! out without consuming it; a fatal outcome ends the action at once.

use crate::channel::Channel;
use crate::config::{invalid, DelayRange};
use crate::error::Result;
use crate::model::{ActionKind, ActionResult, AttemptOutcome, FailureReason, Target};
use crate::stop::StopSignal;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per action and channel, cooldowns excluded
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub backoff_min: Duration,
    #[serde(with = "humantime_serde")]
    pub backoff_max: Duration,
    /// Longest cooldown honoured; longer server requests are capped
    #[serde(with = "humantime_serde")]
    pub max_cooldown: Duration,
    /// Cooldowns tolerated within one action before giving up
    pub max_cooldown_waits: u32,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_min: Duration::from_secs(1),
            backoff_max: Duration::from_secs(3),
            max_cooldown: Duration::from_secs(600),
            max_cooldown_waits: 20,
            circuit_breaker: None,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.backoff_min > self.backoff_max {
            return Err(invalid("retry.backoff_min", "is greater than backoff_max"));
        }
        if let Some(breaker) = &self.circuit_breaker {
            if breaker.threshold == 0 {
                return Err(invalid("retry.circuit_breaker.threshold", "must be at least 1"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failed actions that open the breaker
    pub threshold: u32,
    /// How long the breaker stays open before letting one action through
    #[serde(with = "humantime_serde")]
    pub recovery: Duration,
}

/// Retry loop shared by every channel
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Random delay between transient failures
    pub fn backoff_delay(&self) -> Duration {
        DelayRange::new(self.config.backoff_min, self.config.backoff_max).sample()
    }

    /// Run one action against one channel until it succeeds, fails for good,
    /// runs out of budget or is stopped
    pub async fn execute(
        &self,
        channel: &dyn Channel,
        kind: ActionKind,
        target: &Target,
        stop: &StopSignal,
        breaker: Option<&CircuitBreaker>,
    ) -> ActionResult {
        let mut tally = Tally::default();

        loop {
            if stop.is_stopped() {
                return tally.finish(channel, kind, target, Some(FailureReason::Stopped));
            }
            if let Some(breaker) = breaker {
                if breaker.is_open().await {
                    debug!(channel = channel.name(), "circuit open, skipping {}", kind);
                    return tally.finish(channel, kind, target, Some(FailureReason::CircuitOpen));
                }
            }

            tally.attempts += 1;
            let outcome = channel.attempt(kind, target).await;
            debug!(
                channel = channel.name(),
                %kind,
                %target,
                attempt = tally.attempts,
                "attempt outcome: {:?}",
                outcome
            );

            match outcome {
                AttemptOutcome::Success => {
                    if let Some(breaker) = breaker {
                        breaker.record_success().await;
                    }
                    return tally.finish(channel, kind, target, None);
                }
                AttemptOutcome::Fatal(reason) => {
                    warn!("{} on {} failed fatally: {}", kind, channel.name(), reason);
                    if let Some(breaker) = breaker {
                        breaker.record_failure().await;
                    }
                    return tally.finish(channel, kind, target, Some(FailureReason::Fatal(reason)));
                }
                AttemptOutcome::CooldownRequired(requested) => {
                    tally.cooldowns += 1;
                    if tally.cooldowns > self.config.max_cooldown_waits {
                        warn!(
                            "{} on {} still cooling down after {} waits",
                            kind,
                            channel.name(),
                            self.config.max_cooldown_waits
                        );
                        if let Some(breaker) = breaker {
                            breaker.record_failure().await;
                        }
                        return tally.finish(
                            channel,
                            kind,
                            target,
                            Some(FailureReason::CooldownLimit),
                        );
                    }

                    let wait = requested.min(self.config.max_cooldown);
                    info!(
                        "{} asked for a cooldown of {}s before the next {}",
                        channel.name(),
                        wait.as_secs(),
                        kind
                    );
                    if stop.sleep(wait).await.is_interrupted() {
                        return tally.finish(channel, kind, target, Some(FailureReason::Stopped));
                    }
                }
                AttemptOutcome::TransientFailure(reason) => {
                    tally.budgeted += 1;
                    if tally.budgeted >= self.config.max_attempts {
                        warn!(
                            "{} on {} gave up after {} attempts: {}",
                            kind,
                            channel.name(),
                            tally.budgeted,
                            reason
                        );
                        if let Some(breaker) = breaker {
                            breaker.record_failure().await;
                        }
                        return tally.finish(
                            channel,
                            kind,
                            target,
                            Some(FailureReason::Exhausted(reason)),
                        );
                    }

                    let delay = self.backoff_delay();
                    debug!("retrying {} on {} in {:?}: {}", kind, channel.name(), delay, reason);
                    if stop.sleep(delay).await.is_interrupted() {
                        return tally.finish(channel, kind, target, Some(FailureReason::Stopped));
                    }
                }
            }
        }
    }
}

#[derive(Default)]
struct Tally {
    attempts: u32,
    budgeted: u32,
    cooldowns: u32,
}

impl Tally {
    fn finish(
        &self,
        channel: &dyn Channel,
        kind: ActionKind,
        target: &Target,
        failure: Option<FailureReason>,
    ) -> ActionResult {
        ActionResult {
            kind,
            target: target.clone(),
            channel_name: channel.name().to_string(),
            succeeded: failure.is_none(),
            attempts_used: self.attempts,
            cooldowns_honored: self.cooldowns,
            failure,
        }
    }
}

/// Circuit breaker for one channel
///
/// Opens after `threshold` consecutive failed actions and refuses calls until
/// `recovery` has passed; the next action then goes through half-open and
/// either closes the breaker or opens it again.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { until: Instant },
    HalfOpen,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
            }),
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(config.threshold, config.recovery)
    }

    /// Check if circuit breaker is open
    pub async fn is_open(&self) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Open { until } => {
                if Instant::now() >= until {
                    inner.state = CircuitState::HalfOpen;
                    debug!("Circuit breaker transitioning to half-open");
                    false
                } else {
                    true
                }
            }
            _ => false,
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures = 0;
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            debug!("Circuit breaker closed after successful action");
        }
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures += 1;

        if inner.state == CircuitState::HalfOpen
            || inner.consecutive_failures >= self.failure_threshold
        {
            inner.state = CircuitState::Open {
                until: Instant::now() + self.recovery_timeout,
            };
            warn!(
                "Circuit breaker opened after {} consecutive failures",
                inner.consecutive_failures
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ScriptedChannel;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            backoff_min: Duration::from_millis(1),
            backoff_max: Duration::from_millis(5),
            ..Default::default()
        })
    }

    fn video() -> Target {
        Target::content("https://video/1").unwrap()
    }

    #[tokio::test]
    async fn test_success_on_third_attempt() {
        let channel = ScriptedChannel::new("a", &[ActionKind::Like]).with_script(vec![
            AttemptOutcome::transient("flaky"),
            AttemptOutcome::transient("flaky"),
            AttemptOutcome::Success,
        ]);
        let result = fast_policy(3)
            .execute(&channel, ActionKind::Like, &video(), &StopSignal::new(), None)
            .await;

        assert!(result.succeeded);
        assert_eq!(result.attempts_used, 3);
        assert_eq!(result.failure, None);
        assert_eq!(channel.call_count(), 3);
    }

    #[tokio::test]
    async fn test_always_transient_exhausts_budget() {
        let channel = ScriptedChannel::new("a", &[ActionKind::Like])
            .always(AttemptOutcome::transient("down"));
        let result = fast_policy(3)
            .execute(&channel, ActionKind::Like, &video(), &StopSignal::new(), None)
            .await;

        assert!(!result.succeeded);
        assert_eq!(result.attempts_used, 3);
        assert_eq!(result.failure, Some(FailureReason::Exhausted("down".into())));
    }

    #[tokio::test]
    async fn test_fatal_stops_immediately() {
        let channel = ScriptedChannel::new("a", &[ActionKind::Like])
            .always(AttemptOutcome::fatal("banned"));
        let result = fast_policy(5)
            .execute(&channel, ActionKind::Like, &video(), &StopSignal::new(), None)
            .await;

        assert_eq!(result.attempts_used, 1);
        assert_eq!(result.failure, Some(FailureReason::Fatal("banned".into())));
    }

    #[tokio::test]
    async fn test_cooldown_waits_without_consuming_budget() {
        let channel = ScriptedChannel::new("a", &[ActionKind::Like]).with_script(vec![
            AttemptOutcome::transient("flaky"),
            AttemptOutcome::CooldownRequired(Duration::from_millis(60)),
            AttemptOutcome::transient("flaky"),
            AttemptOutcome::Success,
        ]);
        let result = fast_policy(3)
            .execute(&channel, ActionKind::Like, &video(), &StopSignal::new(), None)
            .await;

        assert!(result.succeeded);
        assert_eq!(result.attempts_used, 4);
        assert_eq!(result.cooldowns_honored, 1);
        assert_eq!(result.budgeted_attempts(), 3);

        let calls = channel.calls();
        assert!(calls[2].at.duration_since(calls[1].at) >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_cooldown_is_capped() {
        let policy = RetryPolicy::new(RetryConfig {
            max_cooldown: Duration::from_millis(10),
            ..Default::default()
        });
        let channel = ScriptedChannel::new("a", &[ActionKind::Like]).with_script(vec![
            AttemptOutcome::CooldownRequired(Duration::from_secs(3600)),
            AttemptOutcome::Success,
        ]);
        let start = Instant::now();
        let result = policy
            .execute(&channel, ActionKind::Like, &video(), &StopSignal::new(), None)
            .await;

        assert!(result.succeeded);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_endless_cooldowns_hit_the_limit() {
        let policy = RetryPolicy::new(RetryConfig {
            max_cooldown_waits: 2,
            ..Default::default()
        });
        let channel = ScriptedChannel::new("a", &[ActionKind::Like])
            .always(AttemptOutcome::CooldownRequired(Duration::from_millis(1)));
        let result = policy
            .execute(&channel, ActionKind::Like, &video(), &StopSignal::new(), None)
            .await;

        assert_eq!(result.failure, Some(FailureReason::CooldownLimit));
        assert_eq!(result.attempts_used, 3);
        assert_eq!(result.budgeted_attempts(), 0);
    }

    #[tokio::test]
    async fn test_stop_interrupts_backoff() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 3,
            backoff_min: Duration::from_secs(30),
            backoff_max: Duration::from_secs(30),
            ..Default::default()
        });
        let channel = ScriptedChannel::new("a", &[ActionKind::Like])
            .always(AttemptOutcome::transient("down"));
        let stop = StopSignal::new();
        let trigger = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.trigger();
        });

        let start = Instant::now();
        let result = policy
            .execute(&channel, ActionKind::Like, &video(), &stop, None)
            .await;

        assert_eq!(result.failure, Some(FailureReason::Stopped));
        assert_eq!(result.attempts_used, 1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_stopped_before_start_makes_no_call() {
        let channel = ScriptedChannel::new("a", &[ActionKind::Like]);
        let stop = StopSignal::new();
        stop.trigger();
        let result = fast_policy(3)
            .execute(&channel, ActionKind::Like, &video(), &stop, None)
            .await;

        assert_eq!(result.attempts_used, 0);
        assert_eq!(channel.call_count(), 0);
    }

    #[tokio::test]
    async fn test_circuit_breaker() {
        let cb = CircuitBreaker::new(3, Duration::from_millis(100));

        for _ in 0..3 {
            cb.record_failure().await;
        }
        assert!(cb.is_open().await);

        tokio::time::sleep(Duration::from_millis(150)).await;

        // Half-open lets the next action through
        assert!(!cb.is_open().await);
        cb.record_success().await;
        assert!(!cb.is_open().await);
    }

    #[tokio::test]
    async fn test_open_breaker_skips_channel() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        let channel = ScriptedChannel::new("a", &[ActionKind::Like])
            .always(AttemptOutcome::fatal("banned"));
        let policy = fast_policy(3);
        let stop = StopSignal::new();

        let first = policy
            .execute(&channel, ActionKind::Like, &video(), &stop, Some(&breaker))
            .await;
        assert!(matches!(first.failure, Some(FailureReason::Fatal(_))));

        let second = policy
            .execute(&channel, ActionKind::Like, &video(), &stop, Some(&breaker))
            .await;
        assert_eq!(second.failure, Some(FailureReason::CircuitOpen));
        assert_eq!(channel.call_count(), 1);
    }

    #[test]
    fn test_config_validation() {
        assert!(RetryConfig::default().validate().is_ok());
        let config = RetryConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
