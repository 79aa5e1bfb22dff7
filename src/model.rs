//! Core data model shared by every layer of the dispatch pipeline
//!
//! Everything here is a plain value: kinds, targets, per-attempt outcomes and
//! the immutable result records the executor hands to the counters.

use crate::error::{CadenceError, ErrorCode, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// The closed catalogue of engagement actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Follow,
    Like,
    View,
    Share,
    Favorite,
    CommentLike,
}

impl ActionKind {
    /// All kinds in the fixed order used for combined runs and reports
    pub const ALL: [ActionKind; 6] = [
        ActionKind::Follow,
        ActionKind::Like,
        ActionKind::View,
        ActionKind::Share,
        ActionKind::Favorite,
        ActionKind::CommentLike,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Follow => "follow",
            ActionKind::Like => "like",
            ActionKind::View => "view",
            ActionKind::Share => "share",
            ActionKind::Favorite => "favorite",
            ActionKind::CommentLike => "comment-like",
        }
    }

    /// Dense index into per-kind tables
    pub fn index(&self) -> usize {
        match self {
            ActionKind::Follow => 0,
            ActionKind::Like => 1,
            ActionKind::View => 2,
            ActionKind::Share => 3,
            ActionKind::Favorite => 4,
            ActionKind::CommentLike => 5,
        }
    }

    /// Whether this kind targets accounts rather than content
    pub fn is_account_kind(&self) -> bool {
        matches!(self, ActionKind::Follow)
    }

    /// Follow applies to account targets; every other kind to content targets
    pub fn applies_to(&self, target: &Target) -> bool {
        match target {
            Target::Account(_) => self.is_account_kind(),
            Target::Content(_) => !self.is_account_kind(),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = CadenceError;

    /// Accepts kind names (`comment-like`, `comment_like`, `commentlike`) and
    /// the operator menu numbers 1 through 6.
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace(['_', ' '], "-");
        let kind = match normalized.as_str() {
            "1" | "follow" | "follows" | "followers" => ActionKind::Follow,
            "2" | "like" | "likes" => ActionKind::Like,
            "3" | "view" | "views" => ActionKind::View,
            "4" | "share" | "shares" => ActionKind::Share,
            "5" | "favorite" | "favorites" | "favourite" => ActionKind::Favorite,
            "6" | "comment-like" | "commentlike" | "comment-likes" => ActionKind::CommentLike,
            _ => {
                return Err(CadenceError::validation_with_code(
                    ErrorCode::VALIDATION_UNKNOWN_KIND,
                    format!("unknown action kind '{}'", s.trim()),
                    Some("kind".to_string()),
                ))
            }
        };
        Ok(kind)
    }
}

/// What an action applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Target {
    /// A content reference, typically a URL
    Content(String),
    /// An account handle, stored without its leading `@`
    Account(String),
}

impl Target {
    pub fn content(reference: impl AsRef<str>) -> Result<Self> {
        let reference = reference.as_ref().trim();
        if reference.is_empty() {
            return Err(empty_target("content reference"));
        }
        Ok(Target::Content(reference.to_string()))
    }

    pub fn account(handle: impl AsRef<str>) -> Result<Self> {
        let handle = handle.as_ref().trim();
        let handle = handle.strip_prefix('@').unwrap_or(handle).trim();
        if handle.is_empty() {
            return Err(empty_target("account handle"));
        }
        Ok(Target::Account(handle.to_string()))
    }

    /// The bare reference: URL for content, handle without `@` for accounts
    pub fn value(&self) -> &str {
        match self {
            Target::Content(v) | Target::Account(v) => v,
        }
    }

    pub fn is_account(&self) -> bool {
        matches!(self, Target::Account(_))
    }
}

fn empty_target(what: &str) -> CadenceError {
    CadenceError::validation_with_code(
        ErrorCode::VALIDATION_EMPTY_TARGET,
        format!("{what} must not be empty"),
        Some("target".to_string()),
    )
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Content(url) => f.write_str(url),
            Target::Account(handle) => write!(f, "@{handle}"),
        }
    }
}

/// Result of exactly one channel call
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success,
    /// Retry locally after a jittered backoff
    TransientFailure(String),
    /// Server-imposed pause; does not consume the attempt budget
    CooldownRequired(Duration),
    /// Unrecoverable for this channel and action
    Fatal(String),
}

impl AttemptOutcome {
    pub fn transient(reason: impl Into<String>) -> Self {
        AttemptOutcome::TransientFailure(reason.into())
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        AttemptOutcome::Fatal(reason.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success)
    }
}

/// Why a retried action ended without success
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// Attempt budget used up; carries the last transient reason
    Exhausted(String),
    Fatal(String),
    /// The stop signal interrupted the action
    Stopped,
    /// The channel's circuit breaker refused the call
    CircuitOpen,
    /// Too many consecutive cooldowns without a decisive outcome
    CooldownLimit,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Exhausted(last) => write!(f, "attempts exhausted ({last})"),
            FailureReason::Fatal(reason) => write!(f, "fatal: {reason}"),
            FailureReason::Stopped => f.write_str("stopped"),
            FailureReason::CircuitOpen => f.write_str("circuit breaker open"),
            FailureReason::CooldownLimit => f.write_str("cooldown limit reached"),
        }
    }
}

/// Outcome of one retried action against one channel
///
/// Created once by the retry policy and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    pub kind: ActionKind,
    pub target: Target,
    pub channel_name: String,
    pub succeeded: bool,
    /// Channel calls made, including calls answered with a cooldown
    pub attempts_used: u32,
    /// Calls answered with a cooldown; these are outside the attempt budget
    pub cooldowns_honored: u32,
    pub failure: Option<FailureReason>,
}

impl ActionResult {
    /// Calls that counted against the attempt budget
    pub fn budgeted_attempts(&self) -> u32 {
        self.attempts_used - self.cooldowns_honored
    }
}

/// Merged result of a `perform` call across every eligible channel
#[derive(Debug, Clone, Serialize)]
pub struct PerformOutcome {
    pub kind: ActionKind,
    pub target: Target,
    pub results: Vec<ActionResult>,
}

impl PerformOutcome {
    /// Successful if any channel succeeded
    pub fn succeeded(&self) -> bool {
        self.results.iter().any(|r| r.succeeded)
    }

    pub fn successes(&self) -> usize {
        self.results.iter().filter(|r| r.succeeded).count()
    }

    /// True when the stop signal cut any channel short
    pub fn was_stopped(&self) -> bool {
        self.results
            .iter()
            .any(|r| r.failure == Some(FailureReason::Stopped))
    }
}
