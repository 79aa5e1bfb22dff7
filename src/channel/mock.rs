use super::{Channel, ChannelState};
use crate::model::{ActionKind, AttemptOutcome, Target};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A channel that replays a scripted sequence of outcomes
///
/// Once the script is drained every call returns the fallback outcome.
/// Calls are recorded so tests can assert on counts, order and timing.
#[derive(Clone)]
pub struct ScriptedChannel {
    name: String,
    kinds: Vec<ActionKind>,
    script: Arc<Mutex<VecDeque<AttemptOutcome>>>,
    fallback: AttemptOutcome,
    latency: Duration,
    exclusive: bool,
    state: Arc<Mutex<ChannelState>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub kind: ActionKind,
    pub target: Target,
    pub at: Instant,
}

impl ScriptedChannel {
    pub fn new(name: &str, kinds: &[ActionKind]) -> Self {
        Self {
            name: name.to_string(),
            kinds: kinds.to_vec(),
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback: AttemptOutcome::Success,
            latency: Duration::ZERO,
            exclusive: false,
            state: Arc::new(Mutex::new(ChannelState::Ready)),
            calls: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Outcomes returned in order before falling back
    pub fn with_script(self, outcomes: Vec<AttemptOutcome>) -> Self {
        *self.script.lock().unwrap() = outcomes.into();
        self
    }

    /// Outcome returned once the script is exhausted
    pub fn always(mut self, outcome: AttemptOutcome) -> Self {
        self.fallback = outcome;
        self
    }

    /// Simulated remote-call latency per attempt
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn set_state(&self, state: ChannelState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of attempts observed running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Channel for ScriptedChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, kind: ActionKind) -> bool {
        self.kinds.contains(&kind)
    }

    fn state(&self) -> ChannelState {
        *self.state.lock().unwrap()
    }

    fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    async fn attempt(&self, kind: ActionKind, target: &Target) -> AttemptOutcome {
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        self.calls.lock().unwrap().push(RecordedCall {
            kind,
            target: target.clone(),
            at: Instant::now(),
        });

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Leaves the in-flight count even when an attempt is cancelled mid-call
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
