//! Progress tracking for generation runs.
//!
//! [`ProgressObserver`] keeps a per-target state table and the log records
//! of each target, and logs lifecycle transitions through `tracing`. Its
//! [`ProgressCounters`] can be shared with a [`ProgressMonitor`] that
//! periodically logs a summary while the run is in flight.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::observer::{LogRecord, Observer, TargetEvent};

/// Snapshot of run progress counters at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Targets registered with the observer.
    pub registered: usize,
    /// Targets currently running.
    pub running: usize,
    /// Targets that produced an implementation.
    pub completed: usize,
    /// Targets that failed.
    pub failed: usize,
    /// Wall-clock elapsed time since the run started.
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Targets that reached a final state.
    pub fn finished(&self) -> usize {
        self.completed + self.failed
    }
}

/// Shared atomic counters for run progress.
#[derive(Debug, Clone)]
pub struct ProgressCounters {
    pub registered: Arc<AtomicUsize>,
    pub running: Arc<AtomicUsize>,
    pub completed: Arc<AtomicUsize>,
    pub failed: Arc<AtomicUsize>,
}

impl Default for ProgressCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCounters {
    /// Create a new set of zeroed progress counters.
    pub fn new() -> Self {
        Self {
            registered: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicUsize::new(0)),
            failed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Take a snapshot of the current counter values.
    pub fn snapshot(&self, start: Instant) -> ProgressSnapshot {
        ProgressSnapshot {
            registered: self.registered.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            elapsed: start.elapsed(),
        }
    }
}

/// Lifecycle state of one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Everything the observer knows about one target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetProgress {
    pub name: String,
    pub status: TargetStatus,
    pub phase: Option<String>,
    pub step: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub logs: Vec<LogRecord>,
}

impl TargetProgress {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TargetStatus::Pending,
            phase: None,
            step: None,
            updated_at: None,
            logs: Vec::new(),
        }
    }
}

/// Observer that tracks per-target state and logs transitions.
#[derive(Debug)]
pub struct ProgressObserver {
    targets: Vec<Option<TargetProgress>>,
    run_logs: Vec<LogRecord>,
    counters: ProgressCounters,
    started: Instant,
    finished: bool,
}

impl Default for ProgressObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver {
    pub fn new() -> Self {
        Self::with_counters(ProgressCounters::new())
    }

    /// Observer updating externally shared counters.
    pub fn with_counters(counters: ProgressCounters) -> Self {
        Self {
            targets: Vec::new(),
            run_logs: Vec::new(),
            counters,
            started: Instant::now(),
            finished: false,
        }
    }

    pub fn counters(&self) -> &ProgressCounters {
        &self.counters
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.counters.snapshot(self.started)
    }

    /// State of the target at `index`, if registered.
    pub fn target(&self, index: usize) -> Option<&TargetProgress> {
        self.targets.get(index).and_then(|t| t.as_ref())
    }

    /// Log records not tied to a target.
    pub fn run_logs(&self) -> &[LogRecord] {
        &self.run_logs
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Stored logs of every failed target, by index.
    pub fn failed_logs(&self) -> Vec<(usize, &str, &[LogRecord])> {
        self.targets
            .iter()
            .enumerate()
            .filter_map(|(index, t)| t.as_ref().map(|t| (index, t)))
            .filter(|(_, t)| t.status == TargetStatus::Failed)
            .map(|(index, t)| (index, t.name.as_str(), t.logs.as_slice()))
            .collect()
    }

    fn slot(&mut self, index: usize, event: &str) -> Option<&mut TargetProgress> {
        match self.targets.get_mut(index).and_then(|t| t.as_mut()) {
            Some(target) => Some(target),
            None => {
                warn!(target_index = index, event, "Event for unknown target index, ignoring");
                None
            }
        }
    }

    fn transition(&mut self, index: usize, status: TargetStatus, event: &str) {
        let Some(target) = self.slot(index, event) else {
            return;
        };
        let previous = target.status;
        if previous == status {
            return;
        }
        target.status = status;
        target.updated_at = Some(Utc::now());
        let name = target.name.clone();

        if previous == TargetStatus::Running {
            self.counters.running.fetch_sub(1, Ordering::Relaxed);
        }
        match status {
            TargetStatus::Running => {
                self.counters.running.fetch_add(1, Ordering::Relaxed);
                debug!(target_index = index, target_name = %name, "Target running");
            }
            TargetStatus::Completed => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                info!(target_index = index, target_name = %name, "Target completed");
            }
            TargetStatus::Failed => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(target_index = index, target_name = %name, "Target failed");
            }
            TargetStatus::Pending => {}
        }
    }
}

impl Observer for ProgressObserver {
    fn add_target(&mut self, name: &str, index: usize, total: usize) {
        if index >= total {
            warn!(target_index = index, total, "Target index out of range, ignoring");
            return;
        }
        if self.targets.len() < total {
            self.targets.resize_with(total, || None);
        }
        if self.targets[index].is_some() {
            warn!(target_index = index, target_name = name, "Target registered twice, ignoring");
            return;
        }
        self.targets[index] = Some(TargetProgress::new(name));
        self.counters.registered.fetch_add(1, Ordering::Relaxed);
        debug!(target_index = index, target_name = name, total, "Target registered");
    }

    fn mark_running(&mut self, index: usize) {
        self.transition(index, TargetStatus::Running, "mark_running");
    }

    fn complete(&mut self, index: usize) {
        self.transition(index, TargetStatus::Completed, "complete");
    }

    fn fail(&mut self, index: usize) {
        self.transition(index, TargetStatus::Failed, "fail");
    }

    fn update_phase(&mut self, event: TargetEvent) {
        let Some(target) = self.slot(event.target_index, "update_phase") else {
            return;
        };
        debug!(
            target_index = event.target_index,
            phase = %event.phase,
            step = %event.step,
            "Target progress"
        );
        target.phase = Some(event.phase);
        target.step = Some(event.step);
        target.updated_at = Some(event.timestamp);
    }

    fn send_log(&mut self, record: LogRecord) {
        match record.target_index {
            None => self.run_logs.push(record),
            Some(index) => {
                if let Some(target) = self.slot(index, "send_log") {
                    target.logs.push(record);
                }
            }
        }
    }

    fn run_finished(&mut self) {
        self.finished = true;
        let snap = self.snapshot();
        info!(
            registered = snap.registered,
            completed = snap.completed,
            failed = snap.failed,
            elapsed_secs = snap.elapsed.as_secs(),
            "Run finished"
        );
    }
}

/// A background task that periodically logs run progress.
///
/// Call [`ProgressMonitor::stop`] to cancel.
pub struct ProgressMonitor {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressMonitor {
    /// Start a background progress monitor that logs every `interval`.
    ///
    /// # Arguments
    ///
    /// * `counters` - Counters updated by the progress observer
    /// * `total` - Number of targets in the run
    /// * `interval` - How often to emit progress logs
    pub fn start(counters: ProgressCounters, total: usize, interval: Duration) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = stop_flag.clone();
        let start = Instant::now();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // skip the immediate first tick

            loop {
                tick.tick().await;
                if flag.load(Ordering::Relaxed) {
                    break;
                }

                let snap = counters.snapshot(start);
                let pct = if total > 0 {
                    (snap.finished() as f64 / total as f64 * 100.0).min(100.0)
                } else {
                    0.0
                };

                info!(
                    running = snap.running,
                    completed = snap.completed,
                    failed = snap.failed,
                    total,
                    progress_pct = format!("{:.1}%", pct),
                    elapsed_secs = snap.elapsed.as_secs(),
                    "Generation progress"
                );
            }
        });

        Self {
            stop_flag,
            handle: Some(handle),
        }
    }

    /// Signal the background monitor to stop and wait for it to finish.
    pub async fn stop(mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::observer::LogLevel;

    fn observer_with(names: &[&str]) -> ProgressObserver {
        let mut observer = ProgressObserver::new();
        for (i, name) in names.iter().enumerate() {
            observer.add_target(name, i, names.len());
        }
        observer
    }

    #[test]
    fn test_lifecycle_counters() {
        let mut observer = observer_with(&["a", "b", "c"]);
        observer.mark_running(0);
        observer.mark_running(1);
        assert_eq!(observer.snapshot().running, 2);

        observer.complete(0);
        observer.fail(1);
        let snap = observer.snapshot();
        assert_eq!(snap.registered, 3);
        assert_eq!(snap.running, 0);
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.finished(), 2);
        assert_eq!(observer.target(2).unwrap().status, TargetStatus::Pending);
    }

    #[test]
    fn test_out_of_range_indexes_ignored() {
        let mut observer = observer_with(&["a"]);
        observer.mark_running(7);
        observer.complete(7);
        observer.update_phase(TargetEvent::new(9, "implementation", "round 1"));
        observer.send_log(LogRecord::new(Some(4), LogLevel::Info, "lost"));
        observer.add_target("z", 5, 2);

        let snap = observer.snapshot();
        assert_eq!(snap.registered, 1);
        assert_eq!(snap.running, 0);
        assert_eq!(snap.completed, 0);
        assert!(observer.target(5).is_none());
    }

    #[test]
    fn test_phase_updates_and_logs() {
        let mut observer = observer_with(&["a", "b"]);
        observer.update_phase(TargetEvent::new(1, "context_gathering", "round 2: awaiting model"));
        observer.send_log(LogRecord::new(Some(1), LogLevel::Warn, "read_source failed"));
        observer.send_log(LogRecord::new(None, LogLevel::Info, "run started"));
        observer.fail(1);

        let target = observer.target(1).unwrap();
        assert_eq!(target.phase.as_deref(), Some("context_gathering"));
        assert_eq!(target.step.as_deref(), Some("round 2: awaiting model"));
        assert_eq!(observer.run_logs().len(), 1);

        let failed = observer.failed_logs();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, 1);
        assert_eq!(failed[0].1, "b");
        assert_eq!(failed[0].2[0].message, "read_source failed");
    }

    #[test]
    fn test_run_finished() {
        let mut observer = observer_with(&["a"]);
        assert!(!observer.is_finished());
        observer.run_finished();
        assert!(observer.is_finished());
    }

    #[tokio::test]
    async fn test_monitor_stops() {
        let monitor = ProgressMonitor::start(ProgressCounters::new(), 3, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;
        monitor.stop().await;
    }
}
