//! Observer contract and the bounded event queue feeding it.
//!
//! The core never calls an observer directly. Events go through an
//! [`EventSender`] into a bounded channel drained by a dedicated task, and a
//! full queue drops the event instead of blocking the sender.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};

/// Severity of an observer log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured log line attached to a target (or to the run when `None`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub target_index: Option<usize>,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    pub fn new(target_index: Option<usize>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            target_index,
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Phase/step progress of one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetEvent {
    pub target_index: usize,
    pub phase: String,
    pub step: String,
    pub timestamp: DateTime<Utc>,
}

impl TargetEvent {
    pub fn new(target_index: usize, phase: impl Into<String>, step: impl Into<String>) -> Self {
        Self {
            target_index,
            phase: phase.into(),
            step: step.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Everything the core tells an observer.
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverEvent {
    AddTarget {
        name: String,
        index: usize,
        total: usize,
    },
    MarkRunning(usize),
    Complete(usize),
    Fail(usize),
    UpdatePhase(TargetEvent),
    Log(LogRecord),
    RunFinished,
}

/// Consumer of lifecycle, progress and log events.
///
/// Runs on its own task, so implementations own their state outright.
pub trait Observer: Send + 'static {
    fn add_target(&mut self, name: &str, index: usize, total: usize);
    fn mark_running(&mut self, index: usize);
    fn complete(&mut self, index: usize);
    fn fail(&mut self, index: usize);
    fn update_phase(&mut self, event: TargetEvent);
    fn send_log(&mut self, record: LogRecord);

    fn run_finished(&mut self) {}

    /// Dispatch one event to the matching method.
    fn handle(&mut self, event: ObserverEvent) {
        match event {
            ObserverEvent::AddTarget { name, index, total } => self.add_target(&name, index, total),
            ObserverEvent::MarkRunning(index) => self.mark_running(index),
            ObserverEvent::Complete(index) => self.complete(index),
            ObserverEvent::Fail(index) => self.fail(index),
            ObserverEvent::UpdatePhase(event) => self.update_phase(event),
            ObserverEvent::Log(record) => self.send_log(record),
            ObserverEvent::RunFinished => self.run_finished(),
        }
    }
}

/// Cloneable, non-blocking handle for emitting observer events.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Option<mpsc::Sender<ObserverEvent>>,
    dropped: Arc<AtomicU64>,
}

impl EventSender {
    /// Sender wired to `tx`.
    pub fn new(tx: mpsc::Sender<ObserverEvent>) -> Self {
        Self {
            tx: Some(tx),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Sender that discards every event.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue an event without waiting.
    pub fn send(&self, event: ObserverEvent) {
        let Some(ref tx) = self.tx else {
            return;
        };

        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped_total = dropped, event = ?event, "Observer queue full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Observer queue closed, dropping event");
            }
        }
    }

    /// Events dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn add_target(&self, name: impl Into<String>, index: usize, total: usize) {
        self.send(ObserverEvent::AddTarget {
            name: name.into(),
            index,
            total,
        });
    }

    pub fn mark_running(&self, index: usize) {
        self.send(ObserverEvent::MarkRunning(index));
    }

    pub fn complete(&self, index: usize) {
        self.send(ObserverEvent::Complete(index));
    }

    pub fn fail(&self, index: usize) {
        self.send(ObserverEvent::Fail(index));
    }

    pub fn update_phase(&self, index: usize, phase: impl Into<String>, step: impl Into<String>) {
        self.send(ObserverEvent::UpdatePhase(TargetEvent::new(index, phase, step)));
    }

    pub fn log(&self, target_index: Option<usize>, level: LogLevel, message: impl Into<String>) {
        self.send(ObserverEvent::Log(LogRecord::new(target_index, level, message)));
    }

    pub fn run_finished(&self) {
        self.send(ObserverEvent::RunFinished);
    }
}

/// Handle to a running observer task.
pub struct ObserverTask<O> {
    handle: JoinHandle<O>,
}

impl<O: Observer> ObserverTask<O> {
    /// Wait for the queue to drain and hand the observer back.
    ///
    /// Returns once every [`EventSender`] clone has been dropped.
    pub async fn finish(self) -> Result<O, JoinError> {
        self.handle.await
    }
}

/// Run `observer` on its own task behind a queue of `capacity` events.
pub fn spawn_observer<O: Observer>(mut observer: O, capacity: usize) -> (EventSender, ObserverTask<O>) {
    let (tx, mut rx) = mpsc::channel(capacity.max(1));

    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            observer.handle(event);
        }
        observer
    });

    (EventSender::new(tx), ObserverTask { handle })
}
