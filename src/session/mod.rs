//! Lifecycle of stateful per-channel sessions
//!
//! A session is created lazily on first use, restored from saved cookies when
//! possible and put through its [`SessionGate`] when the service demands it.
//! Each channel owns at most one live session; [`SessionManager::acquire`]
//! hands out an exclusive lease on it.

pub mod error;
pub mod gate;
pub mod mock;
pub mod solver;
pub mod store;

pub use error::SessionError;
pub use gate::{CaptchaGate, GateConfig, SessionGate};
pub use solver::{ChallengeImage, ChallengeSolver, ConsoleSolver};
pub use store::{ArtifactStore, FileArtifactStore};

use crate::channel::browser::{BrowserLauncher, BrowserSession};
use crate::stop::StopSignal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

/// Where a channel's session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    /// Waiting for the operator to answer a challenge
    AwaitingInput,
    Ready,
    /// Creation failed; stays failed until the next run
    Failed,
    Closed,
}

/// How to build one channel's session
#[derive(Clone)]
pub struct SessionSpec {
    pub launcher: Arc<dyn BrowserLauncher>,
    pub home_url: String,
    pub gate: Option<Arc<dyn SessionGate>>,
}

type Slot = Arc<Mutex<Option<Box<dyn BrowserSession>>>>;

struct Entry {
    spec: SessionSpec,
    slot: Slot,
    state: watch::Sender<SessionState>,
}

impl Entry {
    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }
}

pub struct SessionManager {
    entries: BTreeMap<String, Arc<Entry>>,
    store: Arc<dyn ArtifactStore>,
    challenge_timeout: Duration,
    stop: Mutex<StopSignal>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn ArtifactStore>, challenge_timeout: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            store,
            challenge_timeout,
            stop: Mutex::new(StopSignal::new()),
        }
    }

    /// Register a channel; a second registration replaces the first
    pub fn register(&mut self, channel: impl Into<String>, spec: SessionSpec) {
        let (state, _) = watch::channel(SessionState::Uninitialized);
        self.entries.insert(
            channel.into(),
            Arc::new(Entry {
                spec,
                slot: Arc::new(Mutex::new(None)),
                state,
            }),
        );
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    fn entry(&self, channel: &str) -> Result<&Arc<Entry>, SessionError> {
        self.entries
            .get(channel)
            .ok_or_else(|| SessionError::NotRegistered(channel.to_string()))
    }

    pub fn state(&self, channel: &str) -> Option<SessionState> {
        self.entries.get(channel).map(|e| *e.state.borrow())
    }

    /// Watch state transitions of one channel's session
    pub fn subscribe(&self, channel: &str) -> Option<watch::Receiver<SessionState>> {
        self.entries.get(channel).map(|e| e.state.subscribe())
    }

    /// Exclusive use of a ready session, creating it if needed
    pub async fn acquire(&self, channel: &str) -> Result<SessionLease, SessionError> {
        let entry = self.entry(channel)?.clone();
        if *entry.state.borrow() == SessionState::Failed {
            return Err(SessionError::Failed(channel.to_string()));
        }

        let mut guard = entry.slot.clone().lock_owned().await;

        // Another worker may have failed creation while we waited
        if *entry.state.borrow() == SessionState::Failed {
            return Err(SessionError::Failed(channel.to_string()));
        }

        if guard.is_none() {
            match self.create(channel, &entry).await {
                Ok(session) => {
                    *guard = Some(session);
                    entry.set_state(SessionState::Ready);
                    info!("Session for {} is ready", channel);
                }
                Err(e @ SessionError::Interrupted { .. }) => {
                    // A stop is not a failure; the next run may try again
                    info!("Session setup for {} interrupted", channel);
                    entry.set_state(SessionState::Uninitialized);
                    return Err(e);
                }
                Err(e) => {
                    error!("Session for {} failed: {}", channel, e);
                    entry.set_state(SessionState::Failed);
                    return Err(e);
                }
            }
        }

        Ok(SessionLease { guard, entry })
    }

    async fn create(
        &self,
        channel: &str,
        entry: &Entry,
    ) -> Result<Box<dyn BrowserSession>, SessionError> {
        let mut session = entry
            .spec
            .launcher
            .launch()
            .await
            .map_err(|source| SessionError::Launch {
                channel: channel.to_string(),
                source,
            })?;

        match self.prepare(channel, entry, session.as_mut()).await {
            Ok(()) => Ok(session),
            Err(e) => {
                if let Err(close_err) = session.close().await {
                    debug!("Closing half-built session for {}: {}", channel, close_err);
                }
                Err(e)
            }
        }
    }

    async fn prepare(
        &self,
        channel: &str,
        entry: &Entry,
        session: &mut dyn BrowserSession,
    ) -> Result<(), SessionError> {
        let home = &entry.spec.home_url;
        session.navigate(home).await?;

        match self.store.load_cookies(channel).await {
            Ok(Some(blob)) => {
                debug!("Restoring saved cookies for {}", channel);
                session.import_cookies(&blob).await?;
                session.navigate(home).await?;
            }
            Ok(None) => {}
            Err(e) => warn!("Ignoring unreadable cookies for {}: {}", channel, e),
        }

        if let Some(gate) = &entry.spec.gate {
            if !gate.is_passed(session).await? {
                entry.set_state(SessionState::AwaitingInput);
                self.pass_gate(channel, gate.as_ref(), session).await?;
                session.navigate(home).await?;
            }
        }

        match session.export_cookies().await {
            Ok(blob) => {
                if let Err(e) = self.store.save_cookies(channel, &blob).await {
                    warn!("Could not persist cookies for {}: {}", channel, e);
                }
            }
            Err(e) => warn!("Could not export cookies for {}: {}", channel, e),
        }
        Ok(())
    }

    /// Run the gate, bounded by the challenge timeout and the stop signal
    async fn pass_gate(
        &self,
        channel: &str,
        gate: &dyn SessionGate,
        session: &mut dyn BrowserSession,
    ) -> Result<(), SessionError> {
        let stop = self.stop.lock().await.clone();
        tokio::select! {
            result = tokio::time::timeout(self.challenge_timeout, gate.pass(channel, session)) => {
                result.map_err(|_| SessionError::ChallengeTimeout {
                    channel: channel.to_string(),
                    timeout: self.challenge_timeout,
                })?
            }
            _ = stop.stopped() => Err(SessionError::Interrupted {
                channel: channel.to_string(),
            }),
        }
    }

    /// Close one channel's session
    pub async fn release(&self, channel: &str) -> Result<(), SessionError> {
        let entry = self.entry(channel)?;
        let mut guard = entry.slot.lock().await;
        if let Some(mut session) = guard.take() {
            if let Err(e) = session.close().await {
                warn!("Error closing session for {}: {}", channel, e);
            }
            entry.set_state(SessionState::Closed);
            debug!("Released session for {}", channel);
        }
        Ok(())
    }

    /// Close every live session
    pub async fn release_all(&self) {
        for channel in self.entries.keys() {
            if let Err(e) = self.release(channel).await {
                warn!("Failed to release {}: {}", channel, e);
            }
        }
    }

    /// Prepare for a new run: failed and closed sessions may be created again
    pub async fn reset(&self, stop: StopSignal) {
        *self.stop.lock().await = stop;
        for entry in self.entries.values() {
            let current = *entry.state.borrow();
            if matches!(current, SessionState::Failed | SessionState::Closed) {
                entry.set_state(SessionState::Uninitialized);
            }
        }
    }
}

/// Exclusive hold on a ready session; dropped to hand it back
pub struct SessionLease {
    guard: OwnedMutexGuard<Option<Box<dyn BrowserSession>>>,
    entry: Arc<Entry>,
}

impl SessionLease {
    pub fn session(&mut self) -> Result<&mut dyn BrowserSession, SessionError> {
        match self.guard.as_deref_mut() {
            Some(session) => Ok(session),
            None => Err(SessionError::Browser(
                crate::channel::ChannelError::SessionClosed,
            )),
        }
    }

    /// Drop a broken session so the next acquire builds a fresh one
    pub async fn discard(mut self) {
        if let Some(mut session) = self.guard.take() {
            let _ = session.close().await;
        }
        self.entry.set_state(SessionState::Uninitialized);
    }
}

#[cfg(test)]
mod tests;
