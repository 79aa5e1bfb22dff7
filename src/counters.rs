//! Per-kind success tallies shared by all workers of a run

use crate::model::ActionKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic success counters, one per [`ActionKind`]
///
/// All mutation goes through [`Counters::increment`], a single atomic add, so
/// concurrent workers never lose updates.
#[derive(Debug, Default)]
pub struct Counters {
    values: [AtomicU64; 6],
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a previous run's totals (cumulative mode)
    pub fn seeded_from(previous: &CounterSnapshot) -> Self {
        let counters = Self::new();
        for kind in ActionKind::ALL {
            counters.values[kind.index()].store(previous.get(kind), Ordering::Relaxed);
        }
        counters
    }

    /// Add one success for `kind`, returning the new total
    pub fn increment(&self, kind: ActionKind) -> u64 {
        self.values[kind.index()].fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self, kind: ActionKind) -> u64 {
        self.values[kind.index()].load(Ordering::Relaxed)
    }

    /// Point-in-time read of every counter
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            counts: ActionKind::ALL
                .iter()
                .map(|kind| (*kind, self.get(*kind)))
                .collect(),
            taken_at: Utc::now(),
        }
    }
}

/// Immutable copy of the counters at one instant
#[derive(Debug, Clone, Serialize)]
pub struct CounterSnapshot {
    pub counts: BTreeMap<ActionKind, u64>,
    pub taken_at: DateTime<Utc>,
}

impl Default for CounterSnapshot {
    fn default() -> Self {
        Counters::new().snapshot()
    }
}

impl CounterSnapshot {
    pub fn get(&self, kind: ActionKind) -> u64 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

impl fmt::Display for CounterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = ActionKind::ALL
            .iter()
            .map(|kind| format!("{}={}", kind, self.get(*kind)))
            .collect();
        f.write_str(&parts.join(" "))
    }
}
