//! Bounded worker pool that generates every target of a batch.
//!
//! Each target runs on its own tokio task gated by a semaphore sized to the
//! concurrency cap. Workers push their result into a shared collection; the
//! scheduler waits for all of them and guarantees exactly one result per
//! submitted target.

use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::observer::{EventSender, LogLevel};
use crate::pipeline::runner::PhaseRunner;
use crate::targets::{FailureReason, GenerationResult, Target};

/// Phase tag for failures raised outside the two generation phases.
pub const RUNTIME_PHASE: &str = "runtime";

/// Snapshot of scheduler statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub max_concurrency: usize,
    /// Targets currently inside the runner.
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
    #[serde(rename = "average_duration_ms", serialize_with = "serialize_duration_ms")]
    pub average_duration: Duration,
}

fn serialize_duration_ms<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl SchedulerStats {
    /// Targets finished either way.
    pub fn total_processed(&self) -> u64 {
        self.completed + self.failed
    }

    /// Percentage of finished targets that succeeded.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.completed as f64 / total as f64) * 100.0
    }
}

/// Counters shared by the workers.
#[derive(Default)]
struct SharedSchedulerStats {
    completed: AtomicU64,
    failed: AtomicU64,
    total_duration_ms: AtomicU64,
    active: AtomicU64,
}

impl SharedSchedulerStats {
    fn record(&self, success: bool, duration: Duration) {
        let counter = if success { &self.completed } else { &self.failed };
        counter.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn snapshot(&self, max_concurrency: usize) -> SchedulerStats {
        let completed = self.completed.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        let total = completed + failed;
        let average_duration = if total > 0 {
            Duration::from_millis(self.total_duration_ms.load(Ordering::SeqCst) / total)
        } else {
            Duration::ZERO
        };

        SchedulerStats {
            max_concurrency,
            active: self.active.load(Ordering::SeqCst) as usize,
            completed,
            failed,
            average_duration,
        }
    }
}

/// Keeps the active count right even when the runner unwinds.
struct ActiveGuard<'a>(&'a AtomicU64);

impl<'a> ActiveGuard<'a> {
    fn enter(counter: &'a AtomicU64) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs a batch of targets through the phase runner.
pub struct TargetScheduler {
    runner: Arc<PhaseRunner>,
    max_concurrency: usize,
    events: EventSender,
    /// Counters of the current or most recent run.
    stats: RwLock<Arc<SharedSchedulerStats>>,
}

impl TargetScheduler {
    /// A cap of zero is treated as one.
    pub fn new(runner: Arc<PhaseRunner>, max_concurrency: usize, events: EventSender) -> Self {
        Self {
            runner,
            max_concurrency: max_concurrency.max(1),
            events,
            stats: RwLock::new(Arc::new(SharedSchedulerStats::default())),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Statistics of the current or most recent `execute` call.
    pub fn stats(&self) -> SchedulerStats {
        let stats = Arc::clone(&self.stats.read().unwrap_or_else(PoisonError::into_inner));
        stats.snapshot(self.max_concurrency)
    }

    /// Install fresh counters for a new run.
    fn begin_run(&self) -> Arc<SharedSchedulerStats> {
        let stats = Arc::new(SharedSchedulerStats::default());
        *self.stats.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&stats);
        stats
    }

    /// Generate every target and return one result per target.
    ///
    /// Results come back in completion order; use [`GenerationResult::index`]
    /// to map them to the input. Target failures never abort siblings.
    pub async fn execute(
        &self,
        targets: Vec<Target>,
        cancel: CancellationToken,
    ) -> Vec<GenerationResult> {
        let total = targets.len();
        info!(
            targets = total,
            max_concurrency = self.max_concurrency,
            "Starting generation run"
        );

        let run_stats = self.begin_run();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let results: Arc<Mutex<Vec<GenerationResult>>> =
            Arc::new(Mutex::new(Vec::with_capacity(total)));
        let mut handles = Vec::with_capacity(total);

        for (index, target) in targets.iter().cloned().enumerate() {
            let runner = Arc::clone(&self.runner);
            let semaphore = Arc::clone(&semaphore);
            let results = Arc::clone(&results);
            let stats = Arc::clone(&run_stats);
            let events = self.events.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                events.add_target(target.name.clone(), index, total);

                // The permit is held until the result is recorded.
                let (result, _permit) = match semaphore.acquire_owned().await {
                    Ok(permit) => {
                        events.mark_running(index);
                        let _active = ActiveGuard::enter(&stats.active);
                        let result = run_target(&runner, index, target, &events, &cancel).await;
                        (result, Some(permit))
                    }
                    Err(e) => {
                        let reason =
                            FailureReason::new(RUNTIME_PHASE, format!("worker pool closed: {}", e));
                        (GenerationResult::failed(index, target, reason, Duration::ZERO), None)
                    }
                };

                stats.record(result.is_success(), result.duration());
                if result.is_success() {
                    events.complete(index);
                } else {
                    events.fail(index);
                }
                results.lock().await.push(result);
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task did not finish");
            }
        }

        let mut collected = std::mem::take(&mut *results.lock().await);
        self.backfill_missing(&targets, &mut collected, &run_stats);

        let stats = run_stats.snapshot(self.max_concurrency);
        info!(
            completed = stats.completed,
            failed = stats.failed,
            success_rate = %format!("{:.1}%", stats.success_rate()),
            avg_duration_ms = stats.average_duration.as_millis() as u64,
            observer_events_dropped = self.events.dropped(),
            "Generation run finished"
        );
        self.events.run_finished();

        collected
    }

    /// Add a runtime failure for every target that has no result.
    fn backfill_missing(
        &self,
        targets: &[Target],
        collected: &mut Vec<GenerationResult>,
        stats: &SharedSchedulerStats,
    ) {
        let present: HashSet<usize> = collected.iter().map(|r| r.index()).collect();

        for (index, target) in targets.iter().enumerate() {
            if present.contains(&index) {
                continue;
            }
            warn!(target_index = index, target_name = %target.name, "No result recorded, marking failed");
            stats.record(false, Duration::ZERO);
            self.events.fail(index);
            collected.push(GenerationResult::failed(
                index,
                target.clone(),
                FailureReason::new(RUNTIME_PHASE, "worker task lost before recording a result"),
                Duration::ZERO,
            ));
        }
    }
}

/// Run one target, turning every failure mode into a result.
async fn run_target(
    runner: &PhaseRunner,
    index: usize,
    target: Target,
    events: &EventSender,
    cancel: &CancellationToken,
) -> GenerationResult {
    let started = Instant::now();
    let outcome = AssertUnwindSafe(runner.run(index, &target, events, cancel))
        .catch_unwind()
        .await;
    let duration = started.elapsed();

    match outcome {
        Ok(Ok(implementation)) => GenerationResult::succeeded(index, target, implementation, duration),
        Ok(Err(reason)) => {
            warn!(
                target_index = index,
                target_name = %target.name,
                phase = %reason.phase,
                error = %reason.message,
                "Target failed"
            );
            GenerationResult::failed(index, target, reason, duration)
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(target_index = index, target_name = %target.name, panic = %message, "Worker panicked");
            events.log(Some(index), LogLevel::Error, format!("worker panicked: {}", message));
            GenerationResult::failed(
                index,
                target,
                FailureReason::new(RUNTIME_PHASE, format!("worker panicked: {}", message)),
                duration,
            )
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
