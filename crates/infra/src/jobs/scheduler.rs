//! Scheduler / worker pool.
//!
//! A fixed set of tokio worker tasks loops claim → execute → transition.
//! Every upstream call goes through the shared [`QuotaGovernor`]. A reaper
//! task revokes claims whose lease expired (crashed or stuck workers).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::directory::{DirectoryClient, DirectoryError};

use super::rate_limiter::{QuotaGovernor, QuotaPermit};
use super::store::{ClaimedTask, JobStore, JobStoreError};
use super::types::{ErrorClass, RetryPolicy, TaskError, TaskStatus, TaskTransition};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker tasks (W)
    pub workers: usize,
    /// How long an idle worker waits before polling again
    pub poll_interval: Duration,
    /// Claim lease; an unfinished claim older than this is revoked
    pub lease: Duration,
    /// How often the reaper looks for expired leases
    pub reaper_interval: Duration,
    /// Per-task retry policy
    pub retry: RetryPolicy,
    /// Name for logging
    pub name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            poll_interval: Duration::from_millis(100),
            lease: Duration::from_secs(120),
            reaper_interval: Duration::from_secs(15),
            retry: RetryPolicy::default(),
            name: "scheduler".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Scheduler runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SchedulerStats {
    pub tasks_processed: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub tasks_retried: u64,
    pub tasks_released: u64,
    pub stale_completions: u64,
    pub leases_reclaimed: u64,
    pub systemic_faults: u64,
    pub in_flight: usize,
    pub workers: usize,
    pub uptime_secs: u64,
}

#[derive(Debug)]
struct SharedStats {
    stats: Mutex<SchedulerStats>,
    started: Instant,
}

impl SharedStats {
    fn lock(&self) -> MutexGuard<'_, SchedulerStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to control a running scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    stats: Arc<SharedStats>,
}

impl SchedulerHandle {
    /// Request graceful shutdown and wait for workers to finish their
    /// current task.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for join in self.joins {
            let _ = join.await;
        }
    }

    /// Get current scheduler statistics.
    pub fn stats(&self) -> SchedulerStats {
        let mut stats = self.stats.lock().clone();
        stats.uptime_secs = self.stats.started.elapsed().as_secs();
        stats
    }

    /// Cloneable view of the statistics for other components.
    pub fn stats_reader(&self) -> StatsReader {
        StatsReader {
            stats: self.stats.clone(),
        }
    }
}

/// Read-only access to a running scheduler's statistics.
#[derive(Debug, Clone)]
pub struct StatsReader {
    stats: Arc<SharedStats>,
}

impl StatsReader {
    pub fn stats(&self) -> SchedulerStats {
        let mut stats = self.stats.lock().clone();
        stats.uptime_secs = self.stats.started.elapsed().as_secs();
        stats
    }
}

/// What one execution attempt concluded.
enum Verdict {
    Transition(TaskTransition),
    /// Systemic fault: fail the job, hand the task back.
    Systemic(DirectoryError),
}

/// Kind-agnostic task scheduler.
pub struct Scheduler {
    store: Arc<dyn JobStore>,
    directory: Arc<dyn DirectoryClient>,
    governor: Arc<QuotaGovernor>,
    config: SchedulerConfig,
    stats: Arc<SharedStats>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        directory: Arc<dyn DirectoryClient>,
        governor: Arc<QuotaGovernor>,
        config: SchedulerConfig,
    ) -> Self {
        let stats = SchedulerStats {
            workers: config.workers,
            ..Default::default()
        };
        Self {
            store,
            directory,
            governor,
            config,
            stats: Arc::new(SharedStats {
                stats: Mutex::new(stats),
                started: Instant::now(),
            }),
        }
    }

    /// Spawn the worker pool and the reaper on the current tokio runtime.
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = self.stats.clone();
        let scheduler = Arc::new(self);

        info!(
            scheduler = %scheduler.config.name,
            workers = scheduler.config.workers,
            "scheduler started"
        );

        let mut joins = Vec::with_capacity(scheduler.config.workers + 1);
        for n in 0..scheduler.config.workers {
            let worker = format!("{}-w{}", scheduler.config.name, n);
            joins.push(tokio::spawn(worker_loop(
                scheduler.clone(),
                worker,
                shutdown_rx.clone(),
            )));
        }
        joins.push(tokio::spawn(reaper_loop(scheduler, shutdown_rx)));

        SchedulerHandle {
            shutdown: shutdown_tx,
            joins,
            stats,
        }
    }

    /// Claim and run one task. Returns `false` when nothing was runnable.
    pub async fn process_next(&self, worker: &str) -> Result<bool, JobStoreError> {
        let permit = match self.governor.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                warn!(worker, error = %e, "no quota permit");
                return Ok(false);
            }
        };
        self.process_with(worker, permit).await
    }

    /// Claim and run one task under an already granted permit.
    ///
    /// The lease starts only once the permit is held, so governor waits never
    /// eat into it. An unused permit is refunded.
    async fn process_with(&self, worker: &str, permit: QuotaPermit) -> Result<bool, JobStoreError> {
        let claimed = match self.store.claim_next(worker, self.config.lease).await {
            Ok(Some(claimed)) => claimed,
            Ok(None) => {
                self.governor.refund(permit);
                return Ok(false);
            }
            Err(e) => {
                self.governor.refund(permit);
                return Err(e);
            }
        };
        debug!(
            worker,
            job_id = %claimed.task.job_id,
            task_id = %claimed.task.id,
            attempt = claimed.task.attempt_count,
            "claimed task"
        );

        self.stats.lock().in_flight += 1;
        let verdict = self.attempt(&claimed, permit).await;
        let result = self.settle(&claimed, verdict).await;
        self.stats.lock().in_flight -= 1;

        match result {
            Ok(()) => Ok(true),
            Err(JobStoreError::StaleClaim(task_id)) => {
                warn!(worker, task_id = %task_id, "claim revoked before completion; outcome dropped");
                self.stats.lock().stale_completions += 1;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Run the upstream call under `permit` and classify the result.
    async fn attempt(&self, claimed: &ClaimedTask, permit: QuotaPermit) -> Verdict {
        let task = &claimed.task;
        let result = self
            .directory
            .execute(task.action, &task.entity_key, &claimed.parameters)
            .await;
        drop(permit);

        let err = match result {
            Ok(output) => {
                self.governor.report_success();
                return Verdict::Transition(TaskTransition::Succeeded { output });
            }
            Err(err) => err,
        };

        let class = err.class();
        if class == ErrorClass::Quota {
            self.governor.report_quota_exceeded(err.retry_after());
        }
        let error = TaskError::new(class, err.to_string());
        match class {
            ErrorClass::Systemic => Verdict::Systemic(err),
            _ if class.is_retryable() && self.config.retry.should_retry(task.attempt_count) => {
                let mut delay = self.config.retry.delay_for_attempt(task.attempt_count);
                if let Some(retry_after) = err.retry_after() {
                    delay = delay.max(retry_after);
                }
                let not_before = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_default();
                debug!(
                    task_id = %task.id,
                    attempt = task.attempt_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retryable failure; backing off"
                );
                Verdict::Transition(TaskTransition::Retry { error, not_before })
            }
            _ => Verdict::Transition(TaskTransition::Failed { error }),
        }
    }

    /// Write the verdict back to the store.
    async fn settle(&self, claimed: &ClaimedTask, verdict: Verdict) -> Result<(), JobStoreError> {
        let task = &claimed.task;
        let transition = match verdict {
            Verdict::Transition(t) => t,
            Verdict::Systemic(err) => {
                error!(
                    job_id = %task.job_id,
                    task_id = %task.id,
                    error = %err,
                    "systemic fault; failing job"
                );
                self.store.fail_job(task.job_id, &err.to_string()).await?;
                self.stats.lock().systemic_faults += 1;
                TaskTransition::Released
            }
        };

        if let TaskTransition::Failed { error } = &transition {
            warn!(
                job_id = %task.job_id,
                task_id = %task.id,
                entity = %task.entity_key,
                class = ?error.class,
                error = %error.message,
                "task failed"
            );
        }
        let released = matches!(transition, TaskTransition::Released);

        let updated = self
            .store
            .complete_task(task.id, claimed.claim.token, transition)
            .await?;

        let mut stats = self.stats.lock();
        match updated.status {
            TaskStatus::Success => {
                stats.tasks_processed += 1;
                stats.tasks_succeeded += 1;
            }
            TaskStatus::Failed => {
                stats.tasks_processed += 1;
                stats.tasks_failed += 1;
            }
            _ if released => stats.tasks_released += 1,
            _ => stats.tasks_retried += 1,
        }
        Ok(())
    }

    /// Revoke expired claims once.
    pub async fn reap(&self) -> Result<usize, JobStoreError> {
        let reclaimed = self
            .store
            .reclaim_expired(Utc::now(), self.config.retry.max_attempts)
            .await?;
        if reclaimed > 0 {
            warn!(scheduler = %self.config.name, reclaimed, "revoked expired task claims");
            self.stats.lock().leases_reclaimed += reclaimed as u64;
        }
        Ok(reclaimed)
    }
}

async fn worker_loop(scheduler: Arc<Scheduler>, worker: String, mut shutdown: watch::Receiver<bool>) {
    debug!(worker = %worker, "worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }

        // Wait for quota before claiming; a long cool-down must not hold a lease.
        let permit = tokio::select! {
            permit = scheduler.governor.acquire() => permit,
            _ = shutdown.changed() => break,
        };
        let outcome = match permit {
            Ok(permit) => scheduler.process_with(&worker, permit).await,
            Err(e) => {
                error!(worker = %worker, error = %e, "quota governor closed");
                break;
            }
        };

        let idle = match outcome {
            Ok(true) => false,
            Ok(false) => true,
            Err(e) => {
                error!(worker = %worker, error = %e, "task processing failed");
                true
            }
        };

        if idle {
            tokio::select! {
                _ = tokio::time::sleep(scheduler.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }
    debug!(worker = %worker, "worker stopped");
}

async fn reaper_loop(scheduler: Arc<Scheduler>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(scheduler.config.reaper_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = scheduler.reap().await {
                    error!(scheduler = %scheduler.config.name, error = %e, "lease reaper failed");
                }
            }
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
    }
    info!(scheduler = %scheduler.config.name, "scheduler stopped");
}
