//! Concurrent cyclers under a concurrency cap

use crate::controller::RunPlan;
use crate::cycler::{CyclerConfig, CyclerReport, TargetCycler};
use crate::executor::ActionExecutor;
use crate::model::{ActionKind, Target};
use crate::stop::StopSignal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Targets and kinds handled by one cycler
#[derive(Debug, Clone, PartialEq)]
pub struct WorkGroup {
    pub label: String,
    pub targets: Vec<Target>,
    pub kinds: Vec<ActionKind>,
}

/// Aggregate of every worker's report
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolReport {
    pub workers: Vec<CyclerReport>,
    /// Workers that panicked; their targets stopped cycling
    pub panicked: usize,
    /// Workers aborted because they did not stop in time
    pub cancelled: usize,
}

impl PoolReport {
    pub fn actions_performed(&self) -> u64 {
        self.workers.iter().map(|w| w.actions_performed).sum()
    }
}

/// Split a plan into at most `cap` work groups
///
/// Content targets share one cycler. Account targets get one cycler each,
/// dealt round-robin when there are more accounts than slots. When every
/// channel for the account kinds needs exclusive access the accounts are
/// cycled serially in a single group, since extra workers would only queue
/// on the channel lock.
pub fn plan_groups(plan: &RunPlan, cap: usize, executor: &ActionExecutor) -> Vec<WorkGroup> {
    let cap = cap.max(1);
    let kinds = plan.mode.kinds();
    let (account_kinds, content_kinds): (Vec<ActionKind>, Vec<ActionKind>) =
        kinds.iter().copied().partition(|k| k.is_account_kind());

    let wants_content = !content_kinds.is_empty() && !plan.content_targets.is_empty();
    let wants_accounts = !account_kinds.is_empty() && !plan.account_targets.is_empty();

    if wants_content && wants_accounts && cap == 1 {
        let mut targets = plan.account_targets.clone();
        targets.extend(plan.content_targets.iter().cloned());
        return vec![WorkGroup {
            label: "combined".to_string(),
            targets,
            kinds,
        }];
    }

    let mut groups = Vec::new();
    if wants_content {
        groups.push(WorkGroup {
            label: "content".to_string(),
            targets: plan.content_targets.clone(),
            kinds: content_kinds,
        });
    }

    if wants_accounts {
        let slots = if executor.all_exclusive(&account_kinds) {
            1
        } else {
            (cap - groups.len()).max(1)
        };
        groups.extend(deal(&plan.account_targets, slots, &account_kinds));
    }

    debug!("Planned {} work group(s) for {:?}", groups.len(), plan.mode);
    groups
}

/// Deal targets round-robin into at most `slots` groups
fn deal(targets: &[Target], slots: usize, kinds: &[ActionKind]) -> Vec<WorkGroup> {
    let n = slots.min(targets.len()).max(1);
    let mut buckets: Vec<Vec<Target>> = vec![Vec::new(); n];
    for (i, target) in targets.iter().enumerate() {
        buckets[i % n].push(target.clone());
    }

    buckets
        .into_iter()
        .enumerate()
        .filter(|(_, targets)| !targets.is_empty())
        .map(|(i, targets)| WorkGroup {
            label: if targets.len() == 1 {
                targets[0].to_string()
            } else {
                format!("accounts-{}", i + 1)
            },
            targets,
            kinds: kinds.to_vec(),
        })
        .collect()
}

/// Runs one [`TargetCycler`] per work group, at most `cap` at a time
///
/// Workers stop on their own through the executor's stop signal. The
/// separate `cancel` signal aborts whatever is still running; workers are
/// owned by the pool, so dropping the pool's future aborts them as well.
pub struct WorkerPool {
    cap: usize,
    executor: Arc<ActionExecutor>,
    config: CyclerConfig,
    cancel: StopSignal,
}

impl WorkerPool {
    pub fn new(cap: usize, executor: Arc<ActionExecutor>, config: CyclerConfig) -> Self {
        Self {
            cap: cap.max(1),
            executor,
            config,
            cancel: StopSignal::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: StopSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run every group until it finishes, the stop signal fires, or the
    /// pool is cancelled
    ///
    /// A worker that panics is reported and does not affect the others.
    pub async fn run(&self, groups: Vec<WorkGroup>) -> PoolReport {
        let semaphore = Arc::new(Semaphore::new(self.cap));
        let mut workers = JoinSet::new();
        let mut labels = HashMap::new();

        for (index, group) in groups.into_iter().enumerate() {
            let cycler = match TargetCycler::new(
                group.label.clone(),
                group.targets,
                group.kinds,
                self.executor.clone(),
                self.config,
            ) {
                Ok(cycler) => cycler,
                Err(e) => {
                    warn!("Skipping work group {}: {}", group.label, e);
                    continue;
                }
            };

            let semaphore = semaphore.clone();
            let task = workers.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                Some(cycler.run().await)
            });
            labels.insert(task.id(), (index, group.label));
        }

        info!("Worker pool started {} worker(s), cap {}", workers.len(), self.cap);

        let label = |id: tokio::task::Id| {
            labels
                .get(&id)
                .map_or_else(|| id.to_string(), |(_, label)| label.clone())
        };
        let mut report = PoolReport::default();
        let mut finished = Vec::new();
        loop {
            let joined = tokio::select! {
                joined = workers.join_next_with_id() => Some(joined),
                _ = self.cancel.stopped() => None,
            };
            let joined = match joined {
                Some(Some(joined)) => joined,
                Some(None) => break,
                None => {
                    report.cancelled = workers.len();
                    warn!("Cancelling {} unfinished worker(s)", report.cancelled);
                    workers.shutdown().await;
                    break;
                }
            };

            match joined {
                Ok((id, Some(worker))) => {
                    let index = labels.get(&id).map_or(usize::MAX, |(i, _)| *i);
                    finished.push((index, worker));
                }
                Ok((id, None)) => warn!("Worker {} never started", label(id)),
                Err(e) if e.is_panic() => {
                    error!("Worker {} panicked: {}", label(e.id()), e);
                    report.panicked += 1;
                }
                Err(e) => debug!("Worker {} cancelled: {}", label(e.id()), e),
            }
        }

        finished.sort_by_key(|(index, _)| *index);
        report.workers = finished.into_iter().map(|(_, worker)| worker).collect();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, ScriptedChannel, Serialized};
    use crate::config::{CountingMode, DelayRange};
    use crate::counters::Counters;
    use crate::model::{AttemptOutcome, Target};
    use crate::retry::{RetryConfig, RetryPolicy};
    use crate::stop::StopSignal;
    use async_trait::async_trait;
    use std::time::{Duration, Instant};

    fn executor(channels: Vec<Arc<dyn Channel>>) -> Arc<ActionExecutor> {
        Arc::new(ActionExecutor::new(
            channels,
            RetryPolicy::new(RetryConfig::default()),
            Arc::new(Counters::new()),
            CountingMode::PerChannel,
            StopSignal::new(),
        ))
    }

    fn accounts(n: usize) -> Vec<Target> {
        (1..=n)
            .map(|i| Target::account(format!("user{i}")).unwrap())
            .collect()
    }

    fn quick() -> CyclerConfig {
        CyclerConfig {
            repetitions: 2,
            repetition_delay: DelayRange::zero(),
            target_pause: Duration::ZERO,
            max_cycles: Some(1),
        }
    }

    #[test]
    fn test_accounts_spread_over_cap() {
        let exec = executor(vec![Arc::new(ScriptedChannel::new("f", &[ActionKind::Follow]))]);
        let plan = RunPlan::accounts(accounts(7));

        let groups = plan_groups(&plan, 3, &exec);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].targets.len(), 3);
        assert_eq!(groups[1].targets.len(), 2);
        assert_eq!(groups[2].targets.len(), 2);

        let groups = plan_groups(&RunPlan::accounts(accounts(2)), 5, &exec);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].label, "@user1");
    }

    #[test]
    fn test_exclusive_channels_serialize_accounts() {
        let exec = executor(vec![Serialized::wrap(Arc::new(ScriptedChannel::new(
            "browser",
            &[ActionKind::Follow],
        )))]);
        let groups = plan_groups(&RunPlan::accounts(accounts(4)), 4, &exec);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].targets.len(), 4);
    }

    #[test]
    fn test_combined_plan() {
        let exec = executor(vec![Arc::new(ScriptedChannel::new(
            "any",
            &[ActionKind::Follow, ActionKind::Like],
        ))]);
        let videos = vec![Target::content("https://x/1").unwrap()];
        let plan = RunPlan::combined(
            vec![ActionKind::Follow, ActionKind::Like],
            videos,
            accounts(3),
        );

        let groups = plan_groups(&plan, 3, &exec);
        assert_eq!(groups[0].label, "content");
        assert_eq!(groups[0].kinds, vec![ActionKind::Like]);
        assert_eq!(groups.len(), 3);

        let single = plan_groups(&plan, 1, &exec);
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].targets.len(), 4);
    }

    #[tokio::test]
    async fn test_pool_runs_groups_concurrently() {
        let channel = Arc::new(
            ScriptedChannel::new("f", &[ActionKind::Follow])
                .with_latency(Duration::from_millis(20)),
        );
        let exec = executor(vec![channel.clone()]);
        let plan = RunPlan::accounts(accounts(4));
        let groups = plan_groups(&plan, 4, &exec);

        let report = WorkerPool::new(4, exec.clone(), quick()).run(groups).await;

        assert_eq!(report.workers.len(), 4);
        assert_eq!(report.actions_performed(), 8);
        assert_eq!(exec.counters().get(ActionKind::Follow), 8);
        assert!(channel.max_in_flight() > 1);
    }

    /// Panics on its first call, succeeds afterwards
    struct PanicOnce {
        fired: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Channel for PanicOnce {
        fn name(&self) -> &str {
            "panicky"
        }

        fn supports(&self, kind: ActionKind) -> bool {
            kind == ActionKind::Follow
        }

        fn state(&self) -> crate::channel::ChannelState {
            crate::channel::ChannelState::Ready
        }

        async fn attempt(&self, _kind: ActionKind, _target: &Target) -> AttemptOutcome {
            if !self.fired.swap(true, std::sync::atomic::Ordering::SeqCst) {
                panic!("boom");
            }
            AttemptOutcome::Success
        }
    }

    #[tokio::test]
    async fn test_panicking_worker_is_isolated() {
        let exec = executor(vec![Arc::new(PanicOnce {
            fired: Default::default(),
        })]);
        let groups = vec![
            WorkGroup {
                label: "a".into(),
                targets: accounts(1),
                kinds: vec![ActionKind::Follow],
            },
            WorkGroup {
                label: "b".into(),
                targets: accounts(1),
                kinds: vec![ActionKind::Follow],
            },
        ];

        // Cap 1 runs the two workers one after the other
        let report = WorkerPool::new(1, exec.clone(), quick()).run(groups).await;

        assert_eq!(report.panicked, 1);
        assert_eq!(report.workers.len(), 1);
        assert_eq!(exec.counters().get(ActionKind::Follow), 2);
    }

    #[tokio::test]
    async fn test_cancel_aborts_workers_that_ignore_stop() {
        let channel = Arc::new(
            ScriptedChannel::new("stuck", &[ActionKind::Follow])
                .with_latency(Duration::from_secs(30)),
        );
        let exec = executor(vec![channel.clone()]);
        let groups = plan_groups(&RunPlan::accounts(accounts(3)), 3, &exec);

        let cancel = StopSignal::new();
        let pool = WorkerPool::new(3, exec.clone(), quick()).with_cancel(cancel.clone());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.trigger();
        });

        let start = Instant::now();
        let report = pool.run(groups).await;

        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(report.cancelled, 3);
        assert_eq!(report.panicked, 0);
        assert!(report.workers.is_empty());
        assert_eq!(channel.call_count(), 3);
        assert_eq!(exec.counters().get(ActionKind::Follow), 0);
    }
}
