//! Batch scheduling and progress reporting.
//!
//! - **TargetScheduler**: bounded worker pool, one result per target
//! - **Observer**: event contract plus the bounded queue feeding it
//! - **Progress**: a state-table observer and a periodic progress monitor
//!
//! # Architecture
//!
//! ```text
//!   targets ──► TargetScheduler ──► N workers (Semaphore) ──► PhaseRunner
//!                     │                    │
//!                     └──── EventSender ───┴──► mpsc ──► Observer task
//! ```

pub mod observer;
pub mod progress;
pub mod target_scheduler;

pub use observer::{
    spawn_observer, EventSender, LogLevel, LogRecord, Observer, ObserverEvent, ObserverTask,
    TargetEvent,
};
pub use progress::{
    ProgressCounters, ProgressMonitor, ProgressObserver, ProgressSnapshot, TargetProgress,
    TargetStatus,
};
pub use target_scheduler::{SchedulerStats, TargetScheduler, RUNTIME_PHASE};
