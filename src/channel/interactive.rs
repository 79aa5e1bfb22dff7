//! Browser-driven channel backed by a managed session
//!
//! Each supported kind has a [`FormScript`]: a page to open and chains of
//! fallback selectors for the elements to interact with. The first selector in
//! a chain that matches wins, so one script keeps working across minor
//! markup changes.

use super::browser::{find_first, wait_for, BrowserSession};
use super::request::compile;
use super::{extract_cooldown, render_template, Channel, ChannelError, ChannelState};
use super::DEFAULT_COOLDOWN_PATTERN;
use crate::config::invalid;
use crate::error::Result;
use crate::model::{ActionKind, AttemptOutcome, Target};
use crate::session::{GateConfig, SessionError, SessionManager, SessionState};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractiveChannelConfig {
    pub name: String,
    /// Page loaded when the session is created
    pub home_url: String,
    #[serde(default)]
    pub gate: Option<GateConfig>,
    /// One script per supported kind
    pub scripts: BTreeMap<ActionKind, FormScript>,
    /// Pause after clicks so the page can react
    #[serde(default = "default_settle", with = "humantime_serde")]
    pub settle: Duration,
}

fn default_settle() -> Duration {
    Duration::from_secs(2)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormScript {
    /// Template with `{target}` and `{kind}` placeholders
    pub page_url: String,
    /// Clicked first to reveal the form, when non-empty
    #[serde(default)]
    pub open_selectors: Vec<String>,
    /// Where the target reference is typed
    pub input_selectors: Vec<String>,
    /// Clicked after typing to look the target up, when non-empty
    #[serde(default)]
    pub search_selectors: Vec<String>,
    pub submit_selectors: Vec<String>,
    /// Element whose text reports the result or a cooldown
    #[serde(default)]
    pub result_selector: Option<String>,
    #[serde(default = "default_cooldown_pattern")]
    pub cooldown_pattern: String,
    #[serde(default)]
    pub success_pattern: Option<String>,
    #[serde(default)]
    pub failure_pattern: Option<String>,
}

fn default_cooldown_pattern() -> String {
    DEFAULT_COOLDOWN_PATTERN.to_string()
}

impl InteractiveChannelConfig {
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.home_url)
            .map_err(|e| invalid("channels.home_url", &format!("{}: {e}", self.name)))?;
        if let Some(gate) = &self.gate {
            gate.validate()?;
        }
        for (kind, script) in &self.scripts {
            if script.input_selectors.is_empty() || script.submit_selectors.is_empty() {
                return Err(invalid(
                    "channels.scripts",
                    &format!(
                        "{} script for '{}' needs input and submit selectors",
                        kind, self.name
                    ),
                ));
            }
            CompiledScript::compile(script)?;
        }
        Ok(())
    }
}

struct CompiledScript {
    script: FormScript,
    cooldown: Regex,
    success: Option<Regex>,
    failure: Option<Regex>,
}

impl CompiledScript {
    fn compile(script: &FormScript) -> Result<Self> {
        let optional = |pattern: &Option<String>, field: &str| {
            pattern.as_deref().map(|p| compile(p, field)).transpose()
        };
        Ok(Self {
            cooldown: compile(&script.cooldown_pattern, "channels.scripts.cooldown_pattern")?,
            success: optional(&script.success_pattern, "channels.scripts.success_pattern")?,
            failure: optional(&script.failure_pattern, "channels.scripts.failure_pattern")?,
            script: script.clone(),
        })
    }

    fn classify(&self, text: &str) -> AttemptOutcome {
        if let Some(wait) = extract_cooldown(&self.cooldown, text) {
            return AttemptOutcome::CooldownRequired(wait);
        }
        if self.failure.as_ref().is_some_and(|re| re.is_match(text)) {
            return AttemptOutcome::transient(format!("page reported failure: {}", text.trim()));
        }
        if self.success.as_ref().is_some_and(|re| !re.is_match(text)) {
            return AttemptOutcome::transient(format!("no confirmation: {}", text.trim()));
        }
        AttemptOutcome::Success
    }
}

pub struct InteractiveChannel {
    name: String,
    settle: Duration,
    scripts: BTreeMap<ActionKind, CompiledScript>,
    sessions: Arc<SessionManager>,
}

impl InteractiveChannel {
    /// The channel's session must already be registered with `sessions`
    pub fn new(config: InteractiveChannelConfig, sessions: Arc<SessionManager>) -> Result<Self> {
        config.validate()?;
        let scripts = config
            .scripts
            .iter()
            .map(|(kind, script)| Ok((*kind, CompiledScript::compile(script)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Self {
            name: config.name,
            settle: config.settle,
            scripts,
            sessions,
        })
    }

    async fn click_first(
        &self,
        session: &mut dyn BrowserSession,
        selectors: &[String],
        what: &str,
    ) -> Result<(), ChannelError> {
        let (element, index) = find_first(session, selectors)
            .await?
            .ok_or_else(|| ChannelError::ElementNotFound(format!("{what}: {selectors:?}")))?;
        if index > 0 {
            debug!(channel = %self.name, "{} matched fallback selector #{}", what, index);
        }
        session.click(&element).await?;
        tokio::time::sleep(self.settle).await;
        Ok(())
    }

    async fn read_result(
        &self,
        session: &mut dyn BrowserSession,
        selector: &Option<String>,
    ) -> Result<Option<String>, ChannelError> {
        let Some(selector) = selector else {
            return Ok(None);
        };
        match wait_for(session, selector, self.settle).await? {
            Some(element) => session.text(&element).await.map(Some),
            None => Ok(None),
        }
    }

    async fn drive(
        &self,
        session: &mut dyn BrowserSession,
        compiled: &CompiledScript,
        kind: ActionKind,
        target: &Target,
    ) -> Result<AttemptOutcome, ChannelError> {
        let script = &compiled.script;
        session
            .navigate(&render_template(&script.page_url, kind, target, ""))
            .await?;

        // A cooldown banner may already be showing before we touch the form
        if let Some(text) = self.read_result(session, &script.result_selector).await? {
            if let Some(wait) = extract_cooldown(&compiled.cooldown, &text) {
                return Ok(AttemptOutcome::CooldownRequired(wait));
            }
        }

        if !script.open_selectors.is_empty() {
            self.click_first(session, &script.open_selectors, "form opener")
                .await?;
        }

        let (input, _) = find_first(session, &script.input_selectors)
            .await?
            .ok_or_else(|| ChannelError::ElementNotFound("target input".into()))?;
        session.fill(&input, target.value()).await?;

        if !script.search_selectors.is_empty() {
            self.click_first(session, &script.search_selectors, "search button")
                .await?;
        }

        self.click_first(session, &script.submit_selectors, "submit button")
            .await?;

        Ok(match self.read_result(session, &script.result_selector).await? {
            Some(text) => compiled.classify(&text),
            None if script.result_selector.is_some() => {
                AttemptOutcome::transient("result did not appear")
            }
            None => AttemptOutcome::Success,
        })
    }
}

#[async_trait]
impl Channel for InteractiveChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, kind: ActionKind) -> bool {
        self.scripts.contains_key(&kind)
    }

    fn state(&self) -> ChannelState {
        match self.sessions.state(&self.name) {
            Some(SessionState::Ready) => ChannelState::Ready,
            Some(SessionState::Failed) | None => ChannelState::Failed,
            Some(SessionState::Closed) => ChannelState::Closed,
            Some(SessionState::Uninitialized) | Some(SessionState::AwaitingInput) => {
                ChannelState::Uninitialized
            }
        }
    }

    fn is_exclusive(&self) -> bool {
        true
    }

    async fn attempt(&self, kind: ActionKind, target: &Target) -> AttemptOutcome {
        let Some(compiled) = self.scripts.get(&kind) else {
            return AttemptOutcome::fatal(format!("{} has no script for {}", self.name, kind));
        };

        let mut lease = match self.sessions.acquire(&self.name).await {
            Ok(lease) => lease,
            Err(SessionError::Interrupted { .. }) => {
                return AttemptOutcome::transient("stopped while waiting for session")
            }
            Err(e) => return AttemptOutcome::fatal(e.to_string()),
        };

        let result = match lease.session() {
            Ok(session) => self.drive(session, compiled, kind, target).await,
            Err(_) => Err(ChannelError::SessionClosed),
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) if e.is_session_lost() => {
                warn!(channel = %self.name, "Session lost, it will be recreated: {}", e);
                lease.discard().await;
                AttemptOutcome::transient(e.to_string())
            }
            Err(e) if e.is_fatal() => AttemptOutcome::fatal(e.to_string()),
            Err(e) => AttemptOutcome::transient(e.to_string()),
        }
    }
}
