use crate::channel::interactive::InteractiveChannelConfig;
use crate::channel::request::RequestChannelConfig;
use crate::channel::simulated::SimulatedChannelConfig;
use crate::error::{CadenceError, ErrorCode, Result};
use crate::model::ActionKind;
use crate::retry::RetryConfig;
use directories::ProjectDirs;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

pub mod loader;

pub use loader::ConfigLoader;

/// Get the platform data directory used for persisted session artifacts
pub fn get_global_cadence_dir() -> Result<PathBuf> {
    ProjectDirs::from("com", "cadence", "cadence")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| CadenceError::config("Could not determine home directory"))
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CadenceConfig {
    pub log_level: Option<String>,
    pub run: RunConfig,
    pub retry: RetryConfig,
    pub session: SessionConfig,
    /// Channels in priority order
    pub channels: Vec<ChannelConfig>,
}

/// How successes are tallied when several channels serve one kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CountingMode {
    /// Every successful channel result adds one unit (gross engagement sent)
    #[default]
    PerChannel,
    /// A perform call adds one unit if any channel succeeded
    PerAction,
}

/// Inclusive range a randomized delay is drawn from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DelayRange {
    #[serde(with = "humantime_serde")]
    pub min: Duration,
    #[serde(with = "humantime_serde")]
    pub max: Duration,
}

impl DelayRange {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self::new(delay, delay)
    }

    pub fn zero() -> Self {
        Self::fixed(Duration::ZERO)
    }

    /// Draw a uniformly distributed delay from the range
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let secs = rand::rng().random_range(self.min.as_secs_f64()..=self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Actions per target before advancing
    pub repetitions: u32,
    /// Pause between repetitions on the same target
    pub repetition_delay: DelayRange,
    /// Pause after finishing a target
    #[serde(with = "humantime_serde")]
    pub target_pause: Duration,
    pub max_workers: usize,
    /// Full passes over the target list; unset cycles until stopped
    pub max_cycles: Option<u32>,
    pub counting: CountingMode,
    /// Carry counters over from the previous run
    pub cumulative_totals: bool,
    #[serde(with = "humantime_serde")]
    pub stats_interval: Duration,
    /// Upper bound on how long `stop` waits for workers to drain
    #[serde(with = "humantime_serde")]
    pub stop_timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            repetitions: 10,
            repetition_delay: DelayRange::new(Duration::from_secs(2), Duration::from_secs(5)),
            target_pause: Duration::from_secs(5),
            max_workers: 5,
            max_cycles: None,
            counting: CountingMode::default(),
            cumulative_totals: false,
            stats_interval: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long the operator has to answer a challenge
    #[serde(with = "humantime_serde")]
    pub challenge_timeout: Duration,
    /// Where cookie blobs and challenge images are written
    pub artifact_dir: Option<PathBuf>,
    pub persist_artifacts: bool,
    pub headless: bool,
    pub webdriver_url: String,
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            challenge_timeout: Duration::from_secs(120),
            artifact_dir: None,
            persist_artifacts: true,
            headless: true,
            webdriver_url: "http://127.0.0.1:9515".to_string(),
            command_timeout: Duration::from_secs(30),
        }
    }
}

impl SessionConfig {
    pub fn resolved_artifact_dir(&self) -> Result<PathBuf> {
        match &self.artifact_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(get_global_cadence_dir()?.join("sessions")),
        }
    }
}

/// One configured channel, tagged by its implementation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelConfig {
    Request(RequestChannelConfig),
    Interactive(InteractiveChannelConfig),
    Simulated(SimulatedChannelConfig),
}

impl ChannelConfig {
    pub fn name(&self) -> &str {
        match self {
            ChannelConfig::Request(c) => &c.name,
            ChannelConfig::Interactive(c) => &c.name,
            ChannelConfig::Simulated(c) => &c.name,
        }
    }

    pub fn kinds(&self) -> Vec<ActionKind> {
        match self {
            ChannelConfig::Request(c) => c.kinds.clone(),
            ChannelConfig::Interactive(c) => c.scripts.keys().copied().collect(),
            ChannelConfig::Simulated(c) => c.kinds.clone(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ChannelConfig::Request(_) => "request",
            ChannelConfig::Interactive(_) => "interactive",
            ChannelConfig::Simulated(_) => "simulated",
        }
    }
}

impl CadenceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `CADENCE_*` overrides from the process environment
    pub fn merge_env_vars(&mut self) {
        self.merge_env_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup; unparsable values are ignored
    pub fn merge_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("CADENCE_LOG_LEVEL") {
            self.log_level = Some(level);
        }

        if let Some(workers) = lookup("CADENCE_MAX_WORKERS").and_then(|v| v.parse().ok()) {
            self.run.max_workers = workers;
        }

        if let Some(reps) = lookup("CADENCE_REPETITIONS").and_then(|v| v.parse().ok()) {
            self.run.repetitions = reps;
        }

        if let Some(attempts) = lookup("CADENCE_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.retry.max_attempts = attempts;
        }

        if let Some(url) = lookup("CADENCE_WEBDRIVER_URL") {
            self.session.webdriver_url = url;
        }

        if let Some(headless) = lookup("CADENCE_HEADLESS").and_then(|v| v.parse().ok()) {
            self.session.headless = headless;
        }
    }

    /// Reject configurations that could never run correctly
    pub fn validate(&self) -> Result<()> {
        if self.run.repetitions == 0 {
            return Err(invalid("run.repetitions", "must be at least 1"));
        }
        if self.run.max_workers == 0 {
            return Err(invalid("run.max_workers", "must be at least 1"));
        }
        if self.run.max_cycles == Some(0) {
            return Err(invalid("run.max_cycles", "must be at least 1 when set"));
        }
        if self.run.repetition_delay.min > self.run.repetition_delay.max {
            return Err(invalid("run.repetition_delay", "min is greater than max"));
        }
        self.retry.validate()?;

        let mut names = HashSet::new();
        for channel in &self.channels {
            let name = channel.name();
            if name.trim().is_empty() {
                return Err(invalid("channels.name", "channel name must not be empty"));
            }
            if !names.insert(name.to_string()) {
                return Err(invalid(
                    "channels.name",
                    &format!("duplicate channel name '{name}'"),
                ));
            }
            if channel.kinds().is_empty() {
                return Err(invalid(
                    "channels.kinds",
                    &format!("channel '{name}' supports no action kinds"),
                ));
            }
            match channel {
                ChannelConfig::Request(c) => c.validate()?,
                ChannelConfig::Interactive(c) => c.validate()?,
                ChannelConfig::Simulated(c) => c.validate()?,
            }
        }

        Ok(())
    }
}

pub(crate) fn invalid(field: &str, message: &str) -> CadenceError {
    CadenceError::config_with_code(
        ErrorCode::CONFIG_VALIDATION_FAILED,
        format!("{field}: {message}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_follow_operator_settings() {
        let config = CadenceConfig::default();
        assert_eq!(config.run.repetitions, 10);
        assert_eq!(config.run.max_workers, 5);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.run.counting, CountingMode::PerChannel);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml_with_humantime_durations() {
        let toml_str = r#"
log_level = "debug"

[run]
repetitions = 2
target_pause = "250ms"
repetition_delay = { min = "1s", max = "3s" }
counting = "per_action"
max_cycles = 4

[retry]
max_attempts = 5
backoff_min = "100ms"
backoff_max = "200ms"

[[channels]]
type = "simulated"
name = "dry"
kinds = ["like", "comment-like"]
success_rate = 0.5
"#;
        let config: CadenceConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.run.repetitions, 2);
        assert_eq!(config.run.target_pause, Duration::from_millis(250));
        assert_eq!(config.run.counting, CountingMode::PerAction);
        assert_eq!(config.run.max_cycles, Some(4));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.channels.len(), 1);
        assert_eq!(
            config.channels[0].kinds(),
            vec![ActionKind::Like, ActionKind::CommentLike]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CADENCE_MAX_WORKERS", "9"),
            ("CADENCE_REPETITIONS", "not-a-number"),
            ("CADENCE_HEADLESS", "false"),
        ]
        .into_iter()
        .collect();

        let mut config = CadenceConfig::default();
        config.merge_env_with(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.run.max_workers, 9);
        assert_eq!(config.run.repetitions, 10);
        assert!(!config.session.headless);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = CadenceConfig::default();
        config.run.repetitions = 0;
        assert!(config.validate().is_err());

        let mut config = CadenceConfig::default();
        config.run.repetition_delay = DelayRange::new(Duration::from_secs(5), Duration::from_secs(1));
        assert!(config.validate().is_err());

        let mut config = CadenceConfig::default();
        let channel = ChannelConfig::Simulated(SimulatedChannelConfig::new("dup", vec![ActionKind::Like]));
        config.channels = vec![channel.clone(), channel];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate channel name"));
    }

    #[test]
    fn test_delay_range_sample_within_bounds() {
        let range = DelayRange::new(Duration::from_millis(10), Duration::from_millis(20));
        for _ in 0..50 {
            let delay = range.sample();
            assert!(delay >= Duration::from_millis(10) && delay <= Duration::from_millis(20));
        }
        assert_eq!(DelayRange::zero().sample(), Duration::ZERO);
    }
}
