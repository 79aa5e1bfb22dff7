//! Channel abstraction: one adapter per remote service
//!
//! The orchestration core only ever calls [`Channel::attempt`]. Everything a
//! particular service needs (selector fallbacks, token extraction, response
//! parsing) stays behind this trait and is reported back as an
//! [`AttemptOutcome`].

pub mod browser;
pub mod error;
pub mod http;
pub mod interactive;
pub mod mock;
pub mod request;
pub mod simulated;
pub mod webdriver;

pub use error::ChannelError;
pub use mock::ScriptedChannel;

use crate::model::{ActionKind, AttemptOutcome, Target};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Liveness of a channel within the current run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Uninitialized,
    Ready,
    /// Excluded from routing until a new run starts
    Failed,
    Closed,
}

/// Adapter to one external service
///
/// `attempt` must be safe to call repeatedly and must never panic on remote
/// failures: those map to `TransientFailure`, or `Fatal` when retrying cannot
/// help.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, kind: ActionKind) -> bool;

    fn state(&self) -> ChannelState;

    /// Whether concurrent attempts must be serialized
    fn is_exclusive(&self) -> bool {
        false
    }

    async fn attempt(&self, kind: ActionKind, target: &Target) -> AttemptOutcome;
}

/// Wraps a channel so at most one attempt runs at a time
///
/// The lock is held for a single attempt only, so other workers can use the
/// channel while the holder backs off.
pub struct Serialized {
    inner: Arc<dyn Channel>,
    lock: Mutex<()>,
}

impl Serialized {
    pub fn wrap(inner: Arc<dyn Channel>) -> Arc<dyn Channel> {
        Arc::new(Self {
            inner,
            lock: Mutex::new(()),
        })
    }
}

#[async_trait]
impl Channel for Serialized {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn supports(&self, kind: ActionKind) -> bool {
        self.inner.supports(kind)
    }

    fn state(&self) -> ChannelState {
        self.inner.state()
    }

    fn is_exclusive(&self) -> bool {
        true
    }

    async fn attempt(&self, kind: ActionKind, target: &Target) -> AttemptOutcome {
        let _guard = self.lock.lock().await;
        self.inner.attempt(kind, target).await
    }
}

/// Default pattern for cooldown notices such as "Cooldown: 45" or
/// "Please wait 4 minute(s) 12 second(s)"
pub const DEFAULT_COOLDOWN_PATTERN: &str =
    r"(?i)(?:cooldown|wait)[:\s]+(?:(?P<min>\d+)\s*minute\S*\s*)?(?:(?P<sec>\d+)\s*(?:second)?)?";

/// Pull a cooldown duration out of page or response text
///
/// Named groups `min` and `sec` are summed; a pattern without named groups
/// uses its first capture as seconds. A match that yields no number is not a
/// cooldown.
pub fn extract_cooldown(pattern: &Regex, text: &str) -> Option<Duration> {
    let caps = pattern.captures(text)?;
    let number = |name: &str| {
        caps.name(name)
            .and_then(|m| m.as_str().parse::<u64>().ok())
    };

    let has_named = pattern
        .capture_names()
        .any(|n| matches!(n, Some("min") | Some("sec")));

    let secs = if has_named {
        match (number("min"), number("sec")) {
            (None, None) => return None,
            // Numbers come from remote text; the retry policy caps the wait
            (min, sec) => min
                .unwrap_or(0)
                .saturating_mul(60)
                .saturating_add(sec.unwrap_or(0)),
        }
    } else {
        caps.get(1)?.as_str().parse::<u64>().ok()?
    };

    if secs == 0 {
        return None;
    }
    Some(Duration::from_secs(secs))
}

/// Replace `{target}`, `{kind}` and `{token}` placeholders
pub fn render_template(template: &str, kind: ActionKind, target: &Target, token: &str) -> String {
    template
        .replace("{target}", target.value())
        .replace("{kind}", kind.as_str())
        .replace("{token}", token)
}
