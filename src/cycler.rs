//! Repeats actions over an ordered, wrapping list of targets

use crate::config::{DelayRange, RunConfig};
use crate::error::{CadenceError, ErrorCode, Result};
use crate::executor::ActionExecutor;
use crate::model::{ActionKind, Target};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pacing for one cycler
#[derive(Debug, Clone, Copy)]
pub struct CyclerConfig {
    pub repetitions: u32,
    pub repetition_delay: DelayRange,
    pub target_pause: Duration,
    /// Stop after this many full passes; `None` cycles until stopped
    pub max_cycles: Option<u32>,
}

impl From<&RunConfig> for CyclerConfig {
    fn from(run: &RunConfig) -> Self {
        Self {
            repetitions: run.repetitions,
            repetition_delay: run.repetition_delay,
            target_pause: run.target_pause,
            max_cycles: run.max_cycles,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclerState {
    Selecting,
    Repeating { rep: u32 },
    Advancing,
    Finished,
}

/// What one cycler did before it returned
#[derive(Debug, Clone, Serialize)]
pub struct CyclerReport {
    pub worker: String,
    pub actions_performed: u64,
    pub successes: u64,
    pub passes_completed: u32,
    pub final_index: usize,
}

pub struct TargetCycler {
    worker: String,
    targets: Vec<Target>,
    kinds: Vec<ActionKind>,
    executor: Arc<ActionExecutor>,
    config: CyclerConfig,
    index: usize,
    passes: u32,
    state: CyclerState,
}

impl TargetCycler {
    pub fn new(
        worker: impl Into<String>,
        targets: Vec<Target>,
        kinds: Vec<ActionKind>,
        executor: Arc<ActionExecutor>,
        config: CyclerConfig,
    ) -> Result<Self> {
        if targets.is_empty() {
            return Err(CadenceError::validation_with_code(
                ErrorCode::VALIDATION_EMPTY_LIST,
                "a cycler needs at least one target",
                Some("targets".to_string()),
            ));
        }
        if kinds.is_empty() {
            return Err(CadenceError::validation_with_code(
                ErrorCode::VALIDATION_EMPTY_LIST,
                "a cycler needs at least one action kind",
                Some("kinds".to_string()),
            ));
        }
        Ok(Self {
            worker: worker.into(),
            targets,
            kinds,
            executor,
            config,
            index: 0,
            passes: 0,
            state: CyclerState::Selecting,
        })
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> CyclerState {
        self.state
    }

    pub fn passes_completed(&self) -> u32 {
        self.passes
    }

    /// Move to the next target, wrapping to the first; returns true on wrap
    pub fn advance(&mut self) -> bool {
        self.state = CyclerState::Advancing;
        self.index = (self.index + 1) % self.targets.len();
        let wrapped = self.index == 0;
        if wrapped {
            self.passes += 1;
        }
        wrapped
    }

    fn pass_limit_reached(&self) -> bool {
        self.config.max_cycles.is_some_and(|max| self.passes >= max)
    }

    /// Cycle until stopped or the pass limit is reached
    pub async fn run(mut self) -> CyclerReport {
        let stop = self.executor.stop_signal().clone();
        let mut actions = 0u64;
        let mut successes = 0u64;

        while !stop.is_stopped() {
            self.state = CyclerState::Selecting;
            let target = self.targets[self.index].clone();
            let kinds: Vec<ActionKind> = self
                .kinds
                .iter()
                .copied()
                .filter(|k| k.applies_to(&target))
                .collect();
            info!(
                "[{}] target {}/{}: {}",
                self.worker,
                self.index + 1,
                self.targets.len(),
                target
            );
            if kinds.is_empty() {
                warn!("[{}] no requested kind applies to {}", self.worker, target);
            }

            'reps: for rep in 0..self.config.repetitions {
                self.state = CyclerState::Repeating { rep };
                for kind in &kinds {
                    if stop.is_stopped() {
                        break 'reps;
                    }
                    let outcome = self.executor.perform(*kind, &target).await;
                    actions += 1;
                    successes += outcome.successes() as u64;
                    debug!(
                        "[{}] {} {} rep {}/{}: {} channel(s) succeeded",
                        self.worker,
                        kind,
                        target,
                        rep + 1,
                        self.config.repetitions,
                        outcome.successes()
                    );
                }

                if rep + 1 < self.config.repetitions
                    && stop
                        .sleep(self.config.repetition_delay.sample())
                        .await
                        .is_interrupted()
                {
                    break;
                }
            }

            let wrapped = self.advance();
            if wrapped {
                info!("[{}] completed pass {}", self.worker, self.passes);
                if self.pass_limit_reached() {
                    break;
                }
            }

            if stop.sleep(self.config.target_pause).await.is_interrupted() {
                break;
            }
        }

        self.state = CyclerState::Finished;
        CyclerReport {
            worker: self.worker,
            actions_performed: actions,
            successes,
            passes_completed: self.passes,
            final_index: self.index,
        }
    }
}
