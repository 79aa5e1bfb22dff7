//! Stateless form-submission channel
//!
//! Every attempt opens a fresh HTTP session, reads an anti-forgery token from
//! a landing page, posts one or more forms that echo the token and classifies
//! the final response.

use super::http::{HttpClient, HttpResponse, HttpSession};
use super::{extract_cooldown, render_template, Channel, ChannelError, ChannelState};
use super::DEFAULT_COOLDOWN_PATTERN;
use crate::config::invalid;
use crate::error::Result;
use crate::model::{ActionKind, AttemptOutcome, Target};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One POST in the submission flow; field values are templates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormStep {
    pub url: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestChannelConfig {
    pub name: String,
    pub kinds: Vec<ActionKind>,
    /// Page that issues the anti-forgery token
    pub landing_url: String,
    /// Regex whose first capture group is the token
    pub token_pattern: String,
    /// Posted in order; the last response decides the outcome
    pub steps: Vec<FormStep>,
    #[serde(default)]
    pub success_marker: Option<String>,
    #[serde(default)]
    pub failure_marker: Option<String>,
    #[serde(default = "default_cooldown_pattern")]
    pub cooldown_pattern: String,
    /// Used for HTTP 429 without a numeric `Retry-After`
    #[serde(default = "default_rate_limit_cooldown", with = "humantime_serde")]
    pub rate_limit_cooldown: Duration,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_cooldown_pattern() -> String {
    DEFAULT_COOLDOWN_PATTERN.to_string()
}

fn default_rate_limit_cooldown() -> Duration {
    Duration::from_secs(60)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

impl RequestChannelConfig {
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.landing_url)
            .map_err(|e| invalid("channels.landing_url", &format!("{}: {e}", self.name)))?;
        if self.steps.is_empty() {
            return Err(invalid(
                "channels.steps",
                &format!("channel '{}' needs at least one form step", self.name),
            ));
        }
        compile(&self.token_pattern, "channels.token_pattern")?;
        compile(&self.cooldown_pattern, "channels.cooldown_pattern")?;
        Ok(())
    }
}

pub(crate) fn compile(pattern: &str, field: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| invalid(field, &e.to_string()))
}

pub struct RequestChannel {
    config: RequestChannelConfig,
    token_re: Regex,
    cooldown_re: Regex,
    client: Arc<dyn HttpClient>,
}

impl RequestChannel {
    pub fn new(config: RequestChannelConfig, client: Arc<dyn HttpClient>) -> Result<Self> {
        config.validate()?;
        let token_re = compile(&config.token_pattern, "channels.token_pattern")?;
        let cooldown_re = compile(&config.cooldown_pattern, "channels.cooldown_pattern")?;
        Ok(Self {
            config,
            token_re,
            cooldown_re,
            client,
        })
    }

    async fn submit(
        &self,
        session: &dyn HttpSession,
        kind: ActionKind,
        target: &Target,
    ) -> std::result::Result<HttpResponse, ChannelError> {
        let landing = session.get(&self.config.landing_url).await?;
        if !landing.is_success() {
            return Err(ChannelError::Status(landing.status));
        }

        let token = self
            .token_re
            .captures(&landing.body)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or(ChannelError::MissingToken)?;

        let last = self.config.steps.len() - 1;
        let mut response = landing;
        for (i, step) in self.config.steps.iter().enumerate() {
            let fields: Vec<(String, String)> = step
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), render_template(v, kind, target, &token)))
                .collect();
            let url = render_template(&step.url, kind, target, &token);

            debug!(channel = %self.config.name, step = i, "posting form to {}", url);
            response = session.post_form(&url, &fields).await?;

            if i < last && !response.is_success() {
                return Err(ChannelError::Status(response.status));
            }
        }
        Ok(response)
    }

    /// Map the final response onto an attempt outcome
    pub fn classify(&self, response: &HttpResponse) -> AttemptOutcome {
        match response.status {
            429 => {
                let wait = response
                    .retry_after()
                    .unwrap_or(self.config.rate_limit_cooldown);
                return AttemptOutcome::CooldownRequired(wait);
            }
            401 | 403 => {
                return AttemptOutcome::fatal(format!("rejected with HTTP {}", response.status))
            }
            status if !(200..300).contains(&status) => {
                return AttemptOutcome::transient(format!("HTTP {status}"))
            }
            _ => {}
        }

        if let Some(wait) = extract_cooldown(&self.cooldown_re, &response.body) {
            return AttemptOutcome::CooldownRequired(wait);
        }

        if let Some(marker) = &self.config.failure_marker {
            if response.body.contains(marker.as_str()) {
                return AttemptOutcome::transient(format!("response contained '{marker}'"));
            }
        }

        if let Some(marker) = &self.config.success_marker {
            if !response.body.contains(marker.as_str()) {
                return AttemptOutcome::transient(format!("response lacked '{marker}'"));
            }
        }

        AttemptOutcome::Success
    }
}

#[async_trait]
impl Channel for RequestChannel {
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
        let session = match self.client.open() {
            Ok(session) => session,
            Err(e) => return AttemptOutcome::transient(e.to_string()),
        };

        match self.submit(session.as_ref(), kind, target).await {
            Ok(response) => self.classify(&response),
            Err(e) if e.is_fatal() => AttemptOutcome::fatal(e.to_string()),
            Err(ChannelError::Status(429)) => {
                AttemptOutcome::CooldownRequired(self.config.rate_limit_cooldown)
            }
            Err(e) => AttemptOutcome::transient(e.to_string()),
        }
    }
}
