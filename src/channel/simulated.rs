//! Offline channel for dry runs and rehearsals

use super::{Channel, ChannelState};
use crate::config::{invalid, DelayRange};
use crate::error::Result;
use crate::model::{ActionKind, AttemptOutcome, Target};
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::trace;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedChannelConfig {
    pub name: String,
    pub kinds: Vec<ActionKind>,
    /// Probability in `[0, 1]` that an attempt succeeds
    #[serde(default = "default_success_rate")]
    pub success_rate: f64,
    /// Probability in `[0, 1]` that a non-successful attempt asks for a cooldown
    #[serde(default)]
    pub cooldown_rate: f64,
    #[serde(default = "default_cooldown", with = "humantime_serde")]
    pub cooldown: Duration,
    #[serde(default = "DelayRange::zero")]
    pub latency: DelayRange,
}

fn default_success_rate() -> f64 {
    1.0
}

fn default_cooldown() -> Duration {
    Duration::from_secs(1)
}

impl SimulatedChannelConfig {
    pub fn new(name: impl Into<String>, kinds: Vec<ActionKind>) -> Self {
        Self {
            name: name.into(),
            kinds,
            success_rate: default_success_rate(),
            cooldown_rate: 0.0,
            cooldown: default_cooldown(),
            latency: DelayRange::zero(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (field, rate) in [
            ("channels.success_rate", self.success_rate),
            ("channels.cooldown_rate", self.cooldown_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(invalid(field, &format!("{rate} is outside 0..=1")));
            }
        }
        if self.latency.min > self.latency.max {
            return Err(invalid("channels.latency", "min is greater than max"));
        }
        Ok(())
    }
}

/// Answers attempts from a random draw without touching the network
pub struct SimulatedChannel {
    config: SimulatedChannelConfig,
}

impl SimulatedChannel {
    pub fn new(config: SimulatedChannelConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Channel for SimulatedChannel {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn supports(&self, kind: ActionKind) -> bool {
        self.config.kinds.contains(&kind)
    }

    fn state(&self) -> ChannelState {
        ChannelState::Ready
    }

    async fn attempt(&self, kind: ActionKind, target: &Target) -> AttemptOutcome {
        let latency = self.config.latency.sample();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        // ThreadRng is not Send, so draw both numbers before returning
        let (roll, cooldown_roll) = {
            let mut rng = rand::rng();
            (rng.random::<f64>(), rng.random::<f64>())
        };
        trace!(channel = %self.config.name, %kind, %target, roll, "simulated attempt");

        if roll < self.config.success_rate {
            AttemptOutcome::Success
        } else if cooldown_roll < self.config.cooldown_rate {
            AttemptOutcome::CooldownRequired(self.config.cooldown)
        } else {
            AttemptOutcome::transient("simulated failure")
        }
    }
}
