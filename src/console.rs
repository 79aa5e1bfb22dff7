//! Operator console: list input and statistics output
//!
//! Lists are entered one item per line and end at the first blank line or at
//! end of input. Statistics are printed as periodic counter snapshots, either
//! as a one-line text summary or as JSON for scripting.

use crate::controller::RunSummary;
use crate::counters::CounterSnapshot;
use crate::error::{CadenceError, ErrorCode, Result};
use crate::model::{ActionKind, Target};
use crate::stop::StopSignal;
use std::io::BufRead;
use std::time::Duration;
use tracing::{debug, warn};

/// Read trimmed items until a blank line or EOF
pub fn read_list<R: BufRead>(reader: R) -> Result<Vec<String>> {
    let mut items = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let item = line.trim();
        if item.is_empty() {
            break;
        }
        items.push(item.to_string());
    }
    Ok(items)
}

/// Read content references, one per line
pub fn read_content_targets<R: BufRead>(reader: R) -> Result<Vec<Target>> {
    read_list(reader)?.iter().map(Target::content).collect()
}

/// Read account handles, one per line, with or without a leading `@`
pub fn read_account_targets<R: BufRead>(reader: R) -> Result<Vec<Target>> {
    read_list(reader)?.iter().map(Target::account).collect()
}

/// Parse kind selections given by name or menu number
///
/// Each item may itself hold several comma-separated selections. Duplicates
/// are dropped, keeping the first occurrence.
pub fn parse_kinds<S: AsRef<str>>(items: &[S]) -> Result<Vec<ActionKind>> {
    let mut kinds = Vec::new();
    for item in items {
        for part in item.as_ref().split(',') {
            if part.trim().is_empty() {
                continue;
            }
            let kind: ActionKind = part.parse()?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
    }
    if kinds.is_empty() {
        return Err(CadenceError::validation_with_code(
            ErrorCode::VALIDATION_EMPTY_LIST,
            "no action kinds selected",
            Some("kind".to_string()),
        ));
    }
    Ok(kinds)
}

/// Menu shown when kinds are chosen interactively
pub fn kind_menu() -> String {
    ActionKind::ALL
        .iter()
        .enumerate()
        .map(|(i, kind)| format!("  {}. {}", i + 1, kind))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prints counter snapshots at a fixed interval until stopped
pub struct StatsReporter {
    interval: Duration,
    json: bool,
}

impl StatsReporter {
    pub fn new(interval: Duration, json: bool) -> Self {
        Self { interval, json }
    }

    pub fn render(&self, snapshot: &CounterSnapshot) -> String {
        if self.json {
            match serde_json::to_string(snapshot) {
                Ok(line) => return line,
                Err(e) => warn!("Could not serialize counters: {}", e),
            }
        }
        format!("[{}] {}", snapshot.taken_at.format("%H:%M:%S"), snapshot)
    }

    /// Print `snapshot()` every interval; returns once `stop` fires
    pub async fn run<F>(self, snapshot: F, stop: StopSignal)
    where
        F: Fn() -> CounterSnapshot,
    {
        if self.interval.is_zero() {
            debug!("Statistics reporting disabled");
            stop.stopped().await;
            return;
        }
        loop {
            if stop.sleep(self.interval).await.is_interrupted() {
                break;
            }
            println!("{}", self.render(&snapshot()));
        }
    }
}

/// Human-readable end-of-run report
pub fn render_summary(summary: &RunSummary) -> String {
    let elapsed = (summary.finished_at - summary.started_at)
        .to_std()
        .unwrap_or_default();
    let mut lines = vec![
        format!("Run {} finished after {:.1?}", summary.run_id, elapsed),
        format!("  totals: {}", summary.totals),
        format!(
            "  workers: {}, actions performed: {}",
            summary.report.workers.len(),
            summary.report.actions_performed()
        ),
    ];
    if summary.report.panicked > 0 {
        lines.push(format!("  crashed workers: {}", summary.report.panicked));
    }
    if summary.report.cancelled > 0 {
        lines.push(format!("  cancelled workers: {}", summary.report.cancelled));
    }
    for worker in &summary.report.workers {
        lines.push(format!(
            "  [{}] {} action(s), {} success(es), {} pass(es)",
            worker.worker, worker.actions_performed, worker.successes, worker.passes_completed
        ));
    }
    for (name, state) in &summary.channel_states {
        lines.push(format!("  channel {name}: {state:?}"));
    }
    lines.join("\n")
}
