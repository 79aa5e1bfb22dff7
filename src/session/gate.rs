//! Interactive challenges that stand between a new session and `Ready`

use super::solver::{ChallengeImage, ChallengeSolver};
use super::store::ArtifactStore;
use super::SessionError;
use crate::channel::browser::{wait_for, BrowserSession};
use crate::channel::ChannelError;
use crate::config::invalid;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A check a fresh session must pass before it can be used
#[async_trait]
pub trait SessionGate: Send + Sync {
    /// Whether the session is already past the gate (for example via cookies)
    async fn is_passed(&self, session: &mut dyn BrowserSession) -> Result<bool, ChannelError>;

    /// Drive the session through the gate
    async fn pass(&self, channel: &str, session: &mut dyn BrowserSession)
        -> Result<(), SessionError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Page showing the challenge; the current page when unset
    #[serde(default)]
    pub page_url: Option<String>,
    pub image_selector: String,
    pub input_selector: String,
    pub submit_selector: String,
    /// Present once the challenge has been passed
    pub ready_selector: String,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    #[serde(default = "default_element_wait", with = "humantime_serde")]
    pub element_wait: Duration,
}

fn default_max_rounds() -> u32 {
    3
}

fn default_element_wait() -> Duration {
    Duration::from_secs(10)
}

impl GateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_rounds == 0 {
            return Err(invalid("channels.gate.max_rounds", "must be at least 1"));
        }
        for (field, selector) in [
            ("channels.gate.image_selector", &self.image_selector),
            ("channels.gate.input_selector", &self.input_selector),
            ("channels.gate.submit_selector", &self.submit_selector),
            ("channels.gate.ready_selector", &self.ready_selector),
        ] {
            if selector.trim().is_empty() {
                return Err(invalid(field, "selector must not be empty"));
            }
        }
        Ok(())
    }
}

/// Image challenge answered by a [`ChallengeSolver`]
pub struct CaptchaGate {
    config: GateConfig,
    solver: Arc<dyn ChallengeSolver>,
    store: Arc<dyn ArtifactStore>,
}

impl CaptchaGate {
    pub fn new(
        config: GateConfig,
        solver: Arc<dyn ChallengeSolver>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            config,
            solver,
            store,
        }
    }

    async fn round(
        &self,
        channel: &str,
        session: &mut dyn BrowserSession,
    ) -> Result<bool, SessionError> {
        let image = wait_for(session, &self.config.image_selector, self.config.element_wait)
            .await?
            .ok_or_else(|| SessionError::Challenge {
                channel: channel.to_string(),
                message: format!("challenge image '{}' not found", self.config.image_selector),
            })?;

        let bytes = session.screenshot(&image).await?;
        let path = match self.store.save_challenge(channel, &bytes).await {
            Ok(path) => path,
            Err(e) => {
                warn!("Could not save challenge image for {}: {}", channel, e);
                None
            }
        };
        let answer = self
            .solver
            .solve(channel, &ChallengeImage { bytes, path })
            .await?;

        let input = session
            .find(&self.config.input_selector)
            .await?
            .ok_or_else(|| ChannelError::ElementNotFound(self.config.input_selector.clone()))?;
        session.fill(&input, &answer).await?;
        let submit = session
            .find(&self.config.submit_selector)
            .await?
            .ok_or_else(|| ChannelError::ElementNotFound(self.config.submit_selector.clone()))?;
        session.click(&submit).await?;

        let ready = wait_for(session, &self.config.ready_selector, self.config.element_wait).await?;
        Ok(ready.is_some())
    }
}

#[async_trait]
impl SessionGate for CaptchaGate {
    async fn is_passed(&self, session: &mut dyn BrowserSession) -> Result<bool, ChannelError> {
        Ok(session.find(&self.config.ready_selector).await?.is_some())
    }

    async fn pass(
        &self,
        channel: &str,
        session: &mut dyn BrowserSession,
    ) -> Result<(), SessionError> {
        if let Some(url) = &self.config.page_url {
            session.navigate(url).await?;
        }

        for round in 1..=self.config.max_rounds {
            if self.round(channel, session).await? {
                info!("Challenge for {} accepted", channel);
                return Ok(());
            }
            warn!(
                "Challenge answer for {} rejected (round {}/{})",
                channel, round, self.config.max_rounds
            );
        }

        Err(SessionError::Challenge {
            channel: channel.to_string(),
            message: format!("rejected {} times", self.config.max_rounds),
        })
    }
}
