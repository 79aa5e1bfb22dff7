//! Routes one action to every channel that serves its kind

use crate::channel::{Channel, ChannelState};
use crate::config::CountingMode;
use crate::counters::Counters;
use crate::model::{ActionKind, PerformOutcome, Target};
use crate::retry::{CircuitBreaker, RetryPolicy};
use crate::stop::StopSignal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs the retry policy over each eligible channel in priority order and
/// updates the shared counters
pub struct ActionExecutor {
    channels: Vec<Arc<dyn Channel>>,
    breakers: HashMap<String, CircuitBreaker>,
    policy: RetryPolicy,
    counters: Arc<Counters>,
    counting: CountingMode,
    stop: StopSignal,
}

impl ActionExecutor {
    /// `channels` are tried in the order given
    pub fn new(
        channels: Vec<Arc<dyn Channel>>,
        policy: RetryPolicy,
        counters: Arc<Counters>,
        counting: CountingMode,
        stop: StopSignal,
    ) -> Self {
        let breakers = match &policy.config().circuit_breaker {
            Some(config) => channels
                .iter()
                .map(|c| (c.name().to_string(), CircuitBreaker::from_config(config)))
                .collect(),
            None => HashMap::new(),
        };
        Self {
            channels,
            breakers,
            policy,
            counters,
            counting,
            stop,
        }
    }

    /// Channels that support `kind`, in priority order
    pub fn routes(&self, kind: ActionKind) -> impl Iterator<Item = &Arc<dyn Channel>> {
        self.channels.iter().filter(move |c| c.supports(kind))
    }

    pub fn serves(&self, kind: ActionKind) -> bool {
        self.routes(kind).next().is_some()
    }

    /// Whether every channel serving any of `kinds` needs serialized access
    pub fn all_exclusive(&self, kinds: &[ActionKind]) -> bool {
        let mut serving = self
            .channels
            .iter()
            .filter(|c| kinds.iter().any(|k| c.supports(*k)))
            .peekable();
        serving.peek().is_some() && serving.all(|c| c.is_exclusive())
    }

    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// Perform `kind` on `target` through every eligible channel
    ///
    /// Channels marked failed for this run are skipped. The outcome succeeds
    /// if any channel succeeded.
    pub async fn perform(&self, kind: ActionKind, target: &Target) -> PerformOutcome {
        let mut results = Vec::new();

        if !kind.applies_to(target) {
            warn!("{} does not apply to {}, skipping", kind, target);
            return PerformOutcome {
                kind,
                target: target.clone(),
                results,
            };
        }

        for channel in self.routes(kind) {
            if self.stop.is_stopped() {
                break;
            }
            if channel.state() == ChannelState::Failed {
                debug!("{} is failed for this run, not routing {}", channel.name(), kind);
                continue;
            }

            let breaker = self.breakers.get(channel.name());
            let result = self
                .policy
                .execute(channel.as_ref(), kind, target, &self.stop, breaker)
                .await;

            if result.succeeded && self.counting == CountingMode::PerChannel {
                self.counters.increment(kind);
            }
            if let Some(reason) = &result.failure {
                debug!("{} via {} on {} did not succeed: {}", kind, channel.name(), target, reason);
            }
            results.push(result);
        }

        let outcome = PerformOutcome {
            kind,
            target: target.clone(),
            results,
        };
        if self.counting == CountingMode::PerAction && outcome.succeeded() {
            self.counters.increment(kind);
        }
        outcome
    }
}
