//! Batch job system: expansion, durable task state, quota-governed workers.
//!
//! ## Design
//!
//! - A job is expanded into one task per affected entity at creation time
//! - Tasks are claimed under a lease; completions carry the claim token
//! - Retry policy with exponential backoff and jitter
//! - Directory calls go through one shared quota governor
//! - Failed tasks can be re-armed in a new epoch without re-running successes
//!
//! ## Components
//!
//! - `Job` / `Task`: records and their pure state transitions
//! - `JobStore`: persistence and atomic claiming (in-memory or Postgres)
//! - `QuotaGovernor`: concurrency, rate and cool-down limits on directory calls
//! - `Scheduler`: worker pool and lease reaper
//! - `JobController`: create, inspect and restart jobs

pub mod controller;
pub mod expansion;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod rate_limiter;
pub mod scheduler;
pub mod store;
pub mod types;

pub use controller::{ControllerError, JobController};
pub use expansion::{ExpansionError, expand, validate};
#[cfg(feature = "postgres")]
pub use postgres::PostgresJobStore;
pub use rate_limiter::{GovernorClosed, QuotaConfig, QuotaGovernor, QuotaPermit, QuotaSnapshot};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerHandle, SchedulerStats, StatsReader};
pub use store::{
    ClaimedTask, InMemoryJobStore, JobFilter, JobStore, JobStoreError, RestartOutcome, TaskCounts,
};
pub use types::{
    BackoffStrategy, ErrorClass, Job, JobKind, JobParameters, JobRun, JobStatus, RetryPolicy,
    Task, TaskAction, TaskClaim, TaskError, TaskOutcome, TaskStatus, TaskTransition,
};
