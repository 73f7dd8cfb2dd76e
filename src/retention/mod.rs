//! Data retention for chat history and stored objects.
//!
//! A purge run, driven by [`PurgeOrchestrator`], performs three
//! sub-pipelines:
//! 1. Deletes each conversation's aged message prefix in ascending batches
//!    and advances its retained floor
//! 2. Trims per-user conversation indices to the new floor, notifying users
//!    whose history changed
//! 3. Sweeps aged objects from each configured storage category
//!
//! Failures are isolated per conversation and per category and aggregated
//! into a [`PurgeJobRun`]. The [`Scheduler`] fires runs periodically and
//! never lets two overlap.

mod error;
mod messages;
mod objects;
mod orchestrator;
mod policy;
mod retry;
mod schedule;
mod scheduler;
mod summary;
mod worker;

pub use error::RetentionError;
pub use orchestrator::PurgeOrchestrator;
pub use policy::RetentionPolicy;
pub use retry::with_retry;
pub use schedule::{IntervalTrigger, Schedule, ScheduleError, Trigger};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use summary::{FailureCause, PurgeJobRun, RunStatus, UnitOutcome};
pub use worker::start_retention_worker;

/// Object storage categories a sweep may act on.
pub const KNOWN_OBJECT_CATEGORIES: &[&str] = &[
    "msg-picture",
    "msg-file",
    "msg-voice",
    "msg-video",
    "msg-video-snapshot",
    "sdklog",
];
