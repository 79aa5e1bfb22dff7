//! Application assembly
//!
//! Turns a validated [`CadenceConfig`] into a ready [`RunController`]:
//! - HTTP channels get their own `reqwest` client
//! - browser channels share one WebDriver launcher and a session manager
//! - `dry_run` swaps every channel for a simulated one with the same name
//!   and kinds

pub mod error_handling;
pub mod logging;

pub use error_handling::handle_fatal_error;
pub use logging::init_logging;

use crate::channel::browser::BrowserLauncher;
use crate::channel::http::ReqwestHttpClient;
use crate::channel::interactive::InteractiveChannel;
use crate::channel::request::RequestChannel;
use crate::channel::simulated::{SimulatedChannel, SimulatedChannelConfig};
use crate::channel::webdriver::WebDriverLauncher;
use crate::channel::Channel;
use crate::config::{CadenceConfig, ChannelConfig, DelayRange};
use crate::controller::RunController;
use crate::error::{CadenceError, ErrorCode, Result};
use crate::session::{
    ArtifactStore, CaptchaGate, ChallengeSolver, ConsoleSolver, FileArtifactStore, SessionGate,
    SessionManager, SessionSpec,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Build the controller for `config`
pub fn build_controller(config: &CadenceConfig, dry_run: bool) -> Result<RunController> {
    config.validate()?;

    let store = artifact_store(config)?;
    let mut sessions = SessionManager::new(store.clone(), config.session.challenge_timeout);

    if !dry_run {
        register_sessions(config, &mut sessions, store)?;
    }
    let sessions = Arc::new(sessions);

    let mut channels: Vec<Arc<dyn Channel>> = Vec::with_capacity(config.channels.len());
    for channel in &config.channels {
        let built: Arc<dyn Channel> = if dry_run {
            Arc::new(simulated_stand_in(channel))
        } else {
            build_channel(channel, &sessions)?
        };
        debug!(
            "Channel {} ({}) serves {:?}",
            built.name(),
            if dry_run { "simulated" } else { channel.type_name() },
            channel.kinds()
        );
        channels.push(built);
    }

    info!(
        "Assembled {} channel(s){}",
        channels.len(),
        if dry_run { " in dry-run mode" } else { "" }
    );
    Ok(RunController::new(config.clone(), channels, sessions))
}

fn artifact_store(config: &CadenceConfig) -> Result<Arc<dyn ArtifactStore>> {
    let store = FileArtifactStore::new(config.session.resolved_artifact_dir()?);
    let store = if config.session.persist_artifacts {
        store
    } else {
        store.without_cookies()
    };
    Ok(Arc::new(store))
}

fn register_sessions(
    config: &CadenceConfig,
    sessions: &mut SessionManager,
    store: Arc<dyn ArtifactStore>,
) -> Result<()> {
    let needs_browser = config
        .channels
        .iter()
        .any(|c| matches!(c, ChannelConfig::Interactive(_)));
    if !needs_browser {
        return Ok(());
    }

    let launcher: Arc<dyn BrowserLauncher> = Arc::new(
        WebDriverLauncher::new(
            config.session.webdriver_url.clone(),
            config.session.headless,
            config.session.command_timeout,
        )
        .map_err(|e| {
            CadenceError::config_with_code(
                ErrorCode::CONFIG_VALIDATION_FAILED,
                "cannot set up the WebDriver client",
            )
            .with_source(e)
        })?,
    );
    let solver: Arc<dyn ChallengeSolver> = Arc::new(ConsoleSolver::new());

    for channel in &config.channels {
        let ChannelConfig::Interactive(interactive) = channel else {
            continue;
        };
        let gate = interactive.gate.clone().map(|gate| {
            Arc::new(CaptchaGate::new(gate, solver.clone(), store.clone())) as Arc<dyn SessionGate>
        });
        sessions.register(
            interactive.name.clone(),
            SessionSpec {
                launcher: launcher.clone(),
                home_url: interactive.home_url.clone(),
                gate,
            },
        );
    }
    Ok(())
}

fn build_channel(
    channel: &ChannelConfig,
    sessions: &Arc<SessionManager>,
) -> Result<Arc<dyn Channel>> {
    let built: Arc<dyn Channel> = match channel {
        ChannelConfig::Request(config) => {
            let client = Arc::new(ReqwestHttpClient::new(config.timeout));
            Arc::new(RequestChannel::new(config.clone(), client)?)
        }
        ChannelConfig::Interactive(config) => {
            Arc::new(InteractiveChannel::new(config.clone(), sessions.clone())?)
        }
        ChannelConfig::Simulated(config) => {
            config.validate()?;
            Arc::new(SimulatedChannel::new(config.clone()))
        }
    };
    Ok(built)
}

fn simulated_stand_in(channel: &ChannelConfig) -> SimulatedChannel {
    let mut config = SimulatedChannelConfig::new(channel.name(), channel.kinds());
    config.latency = DelayRange::new(Duration::from_millis(20), Duration::from_millis(120));
    SimulatedChannel::new(config)
}
