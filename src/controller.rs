//! Top-level run lifecycle: one active run at a time
//!
//! The controller owns the authoritative [`RunState`] and the counters of the
//! current run. `start` builds an executor and a worker pool for a
//! [`RunPlan`] and spawns it; `stop` fires the run's stop signal and waits,
//! bounded, for every worker to observe it.

use crate::channel::{Channel, ChannelState, Serialized};
use crate::config::CadenceConfig;
use crate::counters::{CounterSnapshot, Counters};
use crate::cycler::CyclerConfig;
use crate::error::{CadenceError, ErrorCode, Result};
use crate::executor::ActionExecutor;
use crate::model::{ActionKind, Target};
use crate::pool::{plan_groups, PoolReport, WorkerPool};
use crate::retry::RetryPolicy;
use crate::session::SessionManager;
use crate::stop::StopSignal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    StopRequested,
    Stopped,
}

impl RunState {
    pub fn is_active(&self) -> bool {
        matches!(self, RunState::Running | RunState::StopRequested)
    }
}

/// Which target families a run cycles and with which kinds
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RunMode {
    /// One content kind over the content list
    Content { kind: ActionKind },
    /// Follower growth over the account list
    Accounts,
    /// Several kinds; Follow runs on accounts, the rest on content
    Combined { kinds: Vec<ActionKind> },
}

impl RunMode {
    /// Requested kinds in the fixed catalogue order, without duplicates
    pub fn kinds(&self) -> Vec<ActionKind> {
        match self {
            RunMode::Content { kind } => vec![*kind],
            RunMode::Accounts => vec![ActionKind::Follow],
            RunMode::Combined { kinds } => ActionKind::ALL
                .iter()
                .copied()
                .filter(|k| kinds.contains(k))
                .collect(),
        }
    }
}

/// Everything `start` needs to know about a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunPlan {
    pub mode: RunMode,
    pub content_targets: Vec<Target>,
    pub account_targets: Vec<Target>,
}

impl RunPlan {
    pub fn content(kind: ActionKind, targets: Vec<Target>) -> Self {
        Self {
            mode: RunMode::Content { kind },
            content_targets: targets,
            account_targets: Vec::new(),
        }
    }

    pub fn accounts(targets: Vec<Target>) -> Self {
        Self {
            mode: RunMode::Accounts,
            content_targets: Vec::new(),
            account_targets: targets,
        }
    }

    pub fn combined(kinds: Vec<ActionKind>, content: Vec<Target>, accounts: Vec<Target>) -> Self {
        Self {
            mode: RunMode::Combined { kinds },
            content_targets: content,
            account_targets: accounts,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let kinds = self.mode.kinds();
        if kinds.is_empty() {
            return Err(empty_list("kinds", "no action kinds selected"));
        }
        if let RunMode::Content { kind } = &self.mode {
            if kind.is_account_kind() {
                return Err(mismatch(format!(
                    "{kind} applies to accounts; use the accounts mode"
                )));
            }
        }

        if kinds.iter().any(|k| k.is_account_kind()) && self.account_targets.is_empty() {
            return Err(empty_list("accounts", "no account targets given"));
        }
        if kinds.iter().any(|k| !k.is_account_kind()) && self.content_targets.is_empty() {
            return Err(empty_list("targets", "no content targets given"));
        }

        if let Some(t) = self.content_targets.iter().find(|t| t.is_account()) {
            return Err(mismatch(format!("{t} is an account, not content")));
        }
        if let Some(t) = self.account_targets.iter().find(|t| !t.is_account()) {
            return Err(mismatch(format!("{t} is content, not an account")));
        }
        Ok(())
    }
}

fn empty_list(field: &str, message: &str) -> CadenceError {
    CadenceError::validation_with_code(
        ErrorCode::VALIDATION_EMPTY_LIST,
        message,
        Some(field.to_string()),
    )
}

fn mismatch(message: String) -> CadenceError {
    CadenceError::validation_with_code(
        ErrorCode::VALIDATION_KIND_MISMATCH,
        message,
        Some("mode".to_string()),
    )
}

/// Close every session, bounded so a stuck lease cannot hold up a stop
async fn release_sessions(sessions: &SessionManager, timeout: Duration) {
    if tokio::time::timeout(timeout, sessions.release_all())
        .await
        .is_err()
    {
        warn!("Releasing sessions took longer than {:?}, giving up", timeout);
    }
}

/// Final account of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub totals: CounterSnapshot,
    pub report: PoolReport,
    pub channel_states: BTreeMap<String, ChannelState>,
}

pub struct RunController {
    config: CadenceConfig,
    channels: Vec<Arc<dyn Channel>>,
    sessions: Arc<SessionManager>,
    state: Arc<watch::Sender<RunState>>,
    counters: watch::Sender<Arc<Counters>>,
    stop: watch::Sender<StopSignal>,
    /// Aborts the current run's workers when the stop is not honoured in time
    cancel: watch::Sender<StopSignal>,
    handle: Mutex<Option<JoinHandle<RunSummary>>>,
    pool: Mutex<Option<AbortHandle>>,
}

impl RunController {
    /// `channels` are in priority order; exclusive ones get a per-channel lock
    pub fn new(
        config: CadenceConfig,
        channels: Vec<Arc<dyn Channel>>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        let channels = channels
            .into_iter()
            .map(|c| if c.is_exclusive() { Serialized::wrap(c) } else { c })
            .collect();
        let (state, _) = watch::channel(RunState::Idle);
        let (counters, _) = watch::channel(Arc::new(Counters::new()));
        let (stop, _) = watch::channel(StopSignal::new());
        let (cancel, _) = watch::channel(StopSignal::new());
        Self {
            config,
            channels,
            sessions,
            state: Arc::new(state),
            counters,
            stop,
            cancel,
            handle: Mutex::new(None),
            pool: Mutex::new(None),
        }
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Point-in-time copy of the current run's counters
    pub fn snapshot(&self) -> CounterSnapshot {
        self.counters.borrow().snapshot()
    }

    /// Stop signal of the current (or most recent) run
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.borrow().clone()
    }

    pub fn channel_states(&self) -> BTreeMap<String, ChannelState> {
        self.channels
            .iter()
            .map(|c| (c.name().to_string(), c.state()))
            .collect()
    }

    /// Start a run; rejected while another run is active
    pub async fn start(&self, plan: RunPlan) -> Result<Uuid> {
        plan.validate()?;

        let mut handle = self.handle.lock().await;
        if self.state().is_active() {
            return Err(CadenceError::run_with_code(
                ErrorCode::RUN_ALREADY_ACTIVE,
                "a run is already active; stop it first",
            ));
        }

        let unserved: Vec<String> = plan
            .mode
            .kinds()
            .into_iter()
            .filter(|k| !self.channels.iter().any(|c| c.supports(*k)))
            .map(|k| k.to_string())
            .collect();
        if !unserved.is_empty() {
            return Err(CadenceError::run_with_code(
                ErrorCode::RUN_NO_CHANNELS,
                format!("no channel serves {}", unserved.join(", ")),
            ));
        }

        let counters = if self.config.run.cumulative_totals {
            Counters::seeded_from(&self.snapshot())
        } else {
            Counters::new()
        };
        let counters = Arc::new(counters);
        self.counters.send_replace(counters.clone());

        let stop = StopSignal::new();
        self.stop.send_replace(stop.clone());
        let cancel = StopSignal::new();
        self.cancel.send_replace(cancel.clone());
        self.sessions.reset(stop.clone()).await;

        let executor = Arc::new(ActionExecutor::new(
            self.channels.clone(),
            RetryPolicy::new(self.config.retry.clone()),
            counters.clone(),
            self.config.run.counting,
            stop.clone(),
        ));
        let groups = plan_groups(&plan, self.config.run.max_workers, &executor);
        let pool = WorkerPool::new(
            self.config.run.max_workers,
            executor,
            CyclerConfig::from(&self.config.run),
        )
        .with_cancel(cancel);

        let run_id = Uuid::new_v4();
        info!(
            "Starting run {} ({:?}) with {} worker(s)",
            run_id,
            plan.mode,
            groups.len()
        );
        self.state.send_replace(RunState::Running);

        // Spawned on its own so a panic inside the pool cannot skip teardown
        let pool_task = tokio::spawn(async move { pool.run(groups).await });
        *self.pool.lock().await = Some(pool_task.abort_handle());

        let state = self.state.clone();
        let sessions = self.sessions.clone();
        let channels = self.channels.clone();
        let mode = plan.mode.clone();
        let release_timeout = self.config.run.stop_timeout;
        *handle = Some(tokio::spawn(async move {
            let started_at = Utc::now();

            // Mirror an externally triggered stop into the run state
            let mirror_stop = async {
                stop.stopped().await;
                state.send_if_modified(|s| {
                    let running = *s == RunState::Running;
                    if running {
                        *s = RunState::StopRequested;
                    }
                    running
                });
            };
            tokio::pin!(pool_task);
            let joined = tokio::select! {
                joined = &mut pool_task => joined,
                _ = mirror_stop => (&mut pool_task).await,
            };

            let report = match joined {
                Ok(report) => report,
                Err(e) => {
                    error!("Worker pool of run {} crashed: {}", run_id, e);
                    PoolReport {
                        panicked: 1,
                        ..Default::default()
                    }
                }
            };
            release_sessions(&sessions, release_timeout).await;

            let summary = RunSummary {
                run_id,
                mode,
                started_at,
                finished_at: Utc::now(),
                totals: counters.snapshot(),
                report,
                channel_states: channels
                    .iter()
                    .map(|c| (c.name().to_string(), c.state()))
                    .collect(),
            };
            state.send_replace(RunState::Stopped);
            info!("Run {} stopped: {}", run_id, summary.totals);
            summary
        }));

        Ok(run_id)
    }

    /// Request a stop and wait, bounded by `run.stop_timeout`, for the
    /// workers to drain
    pub async fn stop(&self) -> Result<()> {
        match self.state() {
            RunState::Idle => {
                return Err(CadenceError::run_with_code(
                    ErrorCode::RUN_NOT_ACTIVE,
                    "no run has been started",
                ))
            }
            RunState::Stopped => return Ok(()),
            RunState::Running | RunState::StopRequested => {}
        }

        self.state.send_if_modified(|s| {
            let running = *s == RunState::Running;
            if running {
                *s = RunState::StopRequested;
            }
            running
        });
        info!("Stop requested");
        self.stop_signal().trigger();

        let timeout = self.config.run.stop_timeout;
        if self.wait_stopped(timeout).await {
            return Ok(());
        }

        warn!("Workers did not drain within {:?}, cancelling them", timeout);
        self.cancel.borrow().trigger();
        if !self.wait_stopped(timeout).await {
            // The run task itself is wedged; tear everything down from here
            error!("Run did not wind down after cancellation, aborting it");
            if let Some(pool) = self.pool.lock().await.take() {
                pool.abort();
            }
            if let Some(handle) = self.handle.lock().await.take() {
                handle.abort();
            }
            release_sessions(&self.sessions, timeout).await;
            self.state.send_replace(RunState::Stopped);
        }

        Err(CadenceError::run_with_code(
            ErrorCode::RUN_STOP_TIMEOUT,
            format!("workers did not stop within {:?}", timeout),
        ))
    }

    async fn wait_stopped(&self, timeout: Duration) -> bool {
        let mut states = self.subscribe();
        let stopped = tokio::time::timeout(timeout, states.wait_for(|s| *s == RunState::Stopped))
            .await
            .is_ok();
        stopped
    }

    /// Wait for the current run to finish on its own or through a stop
    pub async fn wait(&self) -> Result<RunSummary> {
        let handle = self.handle.lock().await.take().ok_or_else(|| {
            CadenceError::run_with_code(ErrorCode::RUN_NOT_ACTIVE, "no run to wait for")
        })?;
        handle.await.map_err(|e| {
            CadenceError::run_with_code(ErrorCode::RUN_WORKER_PANICKED, "run task failed")
                .with_source(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ScriptedChannel;
    use crate::config::DelayRange;
    use crate::model::AttemptOutcome;
    use crate::session::mock::MemoryArtifactStore;
    use std::time::{Duration, Instant};

    fn config() -> CadenceConfig {
        let mut config = CadenceConfig::default();
        config.run.repetitions = 1;
        config.run.repetition_delay = DelayRange::zero();
        config.run.target_pause = Duration::from_millis(5);
        config.run.stop_timeout = Duration::from_secs(2);
        config.retry.backoff_min = Duration::from_millis(1);
        config.retry.backoff_max = Duration::from_millis(2);
        config
    }

    fn sessions() -> Arc<SessionManager> {
        Arc::new(SessionManager::new(
            Arc::new(MemoryArtifactStore::default()),
            Duration::from_secs(1),
        ))
    }

    fn videos() -> Vec<Target> {
        vec![
            Target::content("https://x/1").unwrap(),
            Target::content("https://x/2").unwrap(),
        ]
    }

    #[test]
    fn test_plan_validation() {
        assert!(RunPlan::content(ActionKind::Like, videos()).validate().is_ok());
        assert!(RunPlan::content(ActionKind::Like, vec![]).validate().is_err());
        assert!(RunPlan::content(ActionKind::Follow, videos()).validate().is_err());
        assert!(RunPlan::accounts(videos()).validate().is_err());

        let plan = RunPlan::combined(vec![ActionKind::Like, ActionKind::Follow], videos(), vec![]);
        let err = plan.validate().unwrap_err();
        assert_eq!(err.code(), ErrorCode::VALIDATION_EMPTY_LIST);
    }

    #[test]
    fn test_combined_kinds_follow_catalogue_order() {
        let mode = RunMode::Combined {
            kinds: vec![ActionKind::View, ActionKind::Follow, ActionKind::View],
        };
        assert_eq!(mode.kinds(), vec![ActionKind::Follow, ActionKind::View]);
    }

    #[tokio::test]
    async fn test_start_while_running_is_rejected() {
        let channel: Arc<dyn Channel> = Arc::new(ScriptedChannel::new("a", &[ActionKind::Like]));
        let controller = RunController::new(config(), vec![channel], sessions());

        controller
            .start(RunPlan::content(ActionKind::Like, videos()))
            .await
            .unwrap();
        let err = controller
            .start(RunPlan::content(ActionKind::Like, videos()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::RUN_ALREADY_ACTIVE);

        controller.stop().await.unwrap();
        assert_eq!(controller.state(), RunState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_is_prompt_and_snapshot_survives() {
        let channel: Arc<dyn Channel> = Arc::new(
            ScriptedChannel::new("a", &[ActionKind::Like]).with_latency(Duration::from_millis(5)),
        );
        let mut config = config();
        config.run.target_pause = Duration::from_secs(60);
        let controller = RunController::new(config, vec![channel], sessions());

        controller
            .start(RunPlan::content(ActionKind::Like, videos()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let start = Instant::now();
        controller.stop().await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));

        let summary = controller.wait().await.unwrap();
        assert_eq!(summary.totals.get(ActionKind::Like), 1);
        assert_eq!(controller.snapshot().get(ActionKind::Like), 1);
    }

    #[tokio::test]
    async fn test_run_finishes_after_max_cycles() {
        let channel: Arc<dyn Channel> = Arc::new(ScriptedChannel::new("a", &[ActionKind::Like]));
        let mut config = config();
        config.run.max_cycles = Some(2);
        let controller = RunController::new(config, vec![channel], sessions());

        controller
            .start(RunPlan::content(ActionKind::Like, videos()))
            .await
            .unwrap();
        let summary = controller.wait().await.unwrap();

        assert_eq!(summary.totals.get(ActionKind::Like), 4);
        assert_eq!(controller.state(), RunState::Stopped);
    }

    #[tokio::test]
    async fn test_counters_reset_unless_cumulative() {
        let channel: Arc<dyn Channel> = Arc::new(ScriptedChannel::new("a", &[ActionKind::Like]));
        let mut config = config();
        config.run.max_cycles = Some(1);
        let controller = RunController::new(config.clone(), vec![channel.clone()], sessions());

        for _ in 0..2 {
            controller
                .start(RunPlan::content(ActionKind::Like, videos()))
                .await
                .unwrap();
            controller.wait().await.unwrap();
        }
        assert_eq!(controller.snapshot().get(ActionKind::Like), 2);

        config.run.cumulative_totals = true;
        let controller = RunController::new(config, vec![channel], sessions());
        for _ in 0..2 {
            controller
                .start(RunPlan::content(ActionKind::Like, videos()))
                .await
                .unwrap();
            controller.wait().await.unwrap();
        }
        assert_eq!(controller.snapshot().get(ActionKind::Like), 4);
    }

    #[tokio::test]
    async fn test_unserved_kind_is_rejected() {
        let channel: Arc<dyn Channel> = Arc::new(ScriptedChannel::new("a", &[ActionKind::View]));
        let controller = RunController::new(config(), vec![channel], sessions());
        let err = controller
            .start(RunPlan::content(ActionKind::Like, videos()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::RUN_NO_CHANNELS);
        assert_eq!(controller.state(), RunState::Idle);
    }

    #[tokio::test]
    async fn test_stop_without_run() {
        let controller = RunController::new(config(), vec![], sessions());
        let err = controller.stop().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::RUN_NOT_ACTIVE);
    }

    #[tokio::test]
    async fn test_failures_do_not_halt_the_run() {
        let channel: Arc<dyn Channel> = Arc::new(
            ScriptedChannel::new("a", &[ActionKind::Like])
                .always(AttemptOutcome::transient("down")),
        );
        let mut config = config();
        config.run.max_cycles = Some(2);
        let controller = RunController::new(config, vec![channel], sessions());

        controller
            .start(RunPlan::content(ActionKind::Like, videos()))
            .await
            .unwrap();
        let summary = controller.wait().await.unwrap();

        assert_eq!(summary.report.actions_performed(), 4);
        assert_eq!(summary.totals.total(), 0);
    }
}
