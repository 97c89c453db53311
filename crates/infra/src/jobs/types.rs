//! Core job types, state machines and policies.
//!
//! The transition methods here are pure: stores call them while holding
//! whatever lock or row lock serializes access, then persist the result.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dirbatch_core::{DomainError, EmailAddress, EntityKey, JobId, OuPath, TaskId};

/// Job kind, used for routing and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    AttributeInjection,
    GroupSync,
    AliasExtraction,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::AttributeInjection => "attribute_injection",
            JobKind::GroupSync => "group_sync",
            JobKind::AliasExtraction => "alias_extraction",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "attribute_injection" => Ok(JobKind::AttributeInjection),
            "group_sync" => Ok(JobKind::GroupSync),
            "alias_extraction" => Ok(JobKind::AliasExtraction),
            other => Err(DomainError::validation(format!("unknown job kind '{other}'"))),
        }
    }
}

/// Kind-specific job parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobParameters {
    AttributeInjection {
        ou_paths: Vec<OuPath>,
        attribute: String,
        value: String,
    },
    GroupSync {
        ou_paths: Vec<OuPath>,
        group_email: EmailAddress,
        /// Also remove group members that were not found under the OUs.
        #[serde(default)]
        prune: bool,
    },
    AliasExtraction {
        #[serde(default)]
        domain: Option<String>,
        /// Empty means the whole domain.
        #[serde(default)]
        ou_paths: Vec<OuPath>,
    },
}

impl JobParameters {
    pub fn kind(&self) -> JobKind {
        match self {
            JobParameters::AttributeInjection { .. } => JobKind::AttributeInjection,
            JobParameters::GroupSync { .. } => JobKind::GroupSync,
            JobParameters::AliasExtraction { .. } => JobKind::AliasExtraction,
        }
    }

    pub fn ou_paths(&self) -> &[OuPath] {
        match self {
            JobParameters::AttributeInjection { ou_paths, .. }
            | JobParameters::GroupSync { ou_paths, .. }
            | JobParameters::AliasExtraction { ou_paths, .. } => ou_paths,
        }
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, no task claimed yet in this epoch
    Pending,
    /// At least one task claimed
    Running,
    /// Every task reached a terminal state (some may have failed)
    Completed,
    /// Stopped by a systemic fault
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::validation(format!("unknown job status '{other}'"))),
        }
    }
}

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "success" => Ok(TaskStatus::Success),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(DomainError::validation(format!("unknown task status '{other}'"))),
        }
    }
}

/// Per-entity operation a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    PatchAttribute,
    AddMember,
    RemoveMember,
    ListAliases,
}

impl TaskAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskAction::PatchAttribute => "patch_attribute",
            TaskAction::AddMember => "add_member",
            TaskAction::RemoveMember => "remove_member",
            TaskAction::ListAliases => "list_aliases",
        }
    }
}

impl std::str::FromStr for TaskAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "patch_attribute" => Ok(TaskAction::PatchAttribute),
            "add_member" => Ok(TaskAction::AddMember),
            "remove_member" => Ok(TaskAction::RemoveMember),
            "list_aliases" => Ok(TaskAction::ListAliases),
            other => Err(DomainError::validation(format!("unknown task action '{other}'"))),
        }
    }
}

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Quota,
    Transient,
    Permanent,
    Systemic,
    LeaseExpired,
}

impl ErrorClass {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorClass::Quota | ErrorClass::Transient | ErrorClass::LeaseExpired
        )
    }
}

/// Classified error recorded on a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub class: ErrorClass,
    pub message: String,
}

impl TaskError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }
}

/// Exclusive claim held by a worker while a task is `processing`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskClaim {
    pub token: Uuid,
    pub worker: String,
    pub lease_expires_at: DateTime<Utc>,
}

/// Outcome a worker reports for a claimed task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskTransition {
    /// Operation succeeded; `output` carries read results.
    Succeeded { output: Option<serde_json::Value> },
    /// Retryable failure; the task becomes claimable again at `not_before`.
    Retry {
        error: TaskError,
        not_before: DateTime<Utc>,
    },
    /// Terminal failure for this epoch.
    Failed { error: TaskError },
    /// Hand the task back untouched (no attempt consumed).
    Released,
}

/// Effect of a task transition on its job's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    Failed,
    Requeued,
}

/// One entity × one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub job_id: JobId,
    pub entity_key: EntityKey,
    pub action: TaskAction,
    pub status: TaskStatus,
    pub attempt_count: u32,
    pub last_error: Option<TaskError>,
    pub result: Option<serde_json::Value>,
    pub not_before: Option<DateTime<Utc>>,
    pub claim: Option<TaskClaim>,
    pub epoch: u32,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(job_id: JobId, entity_key: EntityKey, action: TaskAction) -> Self {
        Self {
            id: TaskId::new(),
            job_id,
            entity_key,
            action,
            status: TaskStatus::Pending,
            attempt_count: 0,
            last_error: None,
            result: None,
            not_before: None,
            claim: None,
            epoch: 1,
            updated_at: Utc::now(),
        }
    }

    /// Earliest instant the task may be claimed.
    pub fn ready_at(&self) -> DateTime<Utc> {
        self.not_before.unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.ready_at() <= now
    }

    /// Mark as processing under a fresh claim; consumes one attempt.
    pub fn claim(&mut self, worker: &str, lease: Duration, now: DateTime<Utc>) -> TaskClaim {
        let lease = chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::MAX);
        let claim = TaskClaim {
            token: Uuid::now_v7(),
            worker: worker.to_string(),
            lease_expires_at: now.checked_add_signed(lease).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        self.status = TaskStatus::Processing;
        self.attempt_count += 1;
        self.not_before = None;
        self.claim = Some(claim.clone());
        self.updated_at = now;
        claim
    }

    pub fn holds_claim(&self, token: Uuid) -> bool {
        self.status == TaskStatus::Processing
            && self.claim.as_ref().is_some_and(|c| c.token == token)
    }

    /// Apply a worker-reported transition. The caller verifies the claim.
    pub fn apply(&mut self, transition: TaskTransition, now: DateTime<Utc>) -> TaskOutcome {
        self.claim = None;
        self.updated_at = now;
        match transition {
            TaskTransition::Succeeded { output } => {
                self.status = TaskStatus::Success;
                self.last_error = None;
                self.result = output;
                TaskOutcome::Succeeded
            }
            TaskTransition::Retry { error, not_before } => {
                self.status = TaskStatus::Pending;
                self.last_error = Some(error);
                self.not_before = Some(not_before);
                TaskOutcome::Requeued
            }
            TaskTransition::Failed { error } => {
                self.status = TaskStatus::Failed;
                self.last_error = Some(error);
                TaskOutcome::Failed
            }
            TaskTransition::Released => {
                self.status = TaskStatus::Pending;
                self.attempt_count = self.attempt_count.saturating_sub(1);
                TaskOutcome::Requeued
            }
        }
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Processing
            && self.claim.as_ref().is_some_and(|c| c.lease_expires_at <= now)
    }

    /// Revoke an expired claim.
    pub fn expire_claim(&mut self, max_attempts: u32, now: DateTime<Utc>) -> TaskOutcome {
        let worker = self
            .claim
            .as_ref()
            .map(|c| c.worker.clone())
            .unwrap_or_default();
        let error = TaskError::new(
            ErrorClass::LeaseExpired,
            format!("claim held by '{worker}' expired"),
        );
        if self.attempt_count >= max_attempts {
            self.apply(TaskTransition::Failed { error }, now)
        } else {
            self.apply(
                TaskTransition::Retry {
                    error,
                    not_before: now,
                },
                now,
            )
        }
    }

    /// Re-arm a failed task for a new epoch.
    pub fn rearm(&mut self, epoch: u32, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::Failed {
            return false;
        }
        self.status = TaskStatus::Pending;
        self.attempt_count = 0;
        self.last_error = None;
        self.not_before = None;
        self.epoch = epoch;
        self.updated_at = now;
        true
    }
}

/// Summary of a finished execution epoch, archived by restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
    pub epoch: u32,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub succeeded: u64,
    pub failed: u64,
    pub error_message: Option<String>,
    pub archived_at: DateTime<Utc>,
}

/// A batch job: aggregate metadata over its tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub parameters: JobParameters,
    pub status: JobStatus,
    pub total: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub epoch: u32,
    #[serde(default)]
    pub history: Vec<JobRun>,
}

impl Job {
    pub fn new(parameters: JobParameters) -> Self {
        Self {
            id: JobId::new(),
            kind: parameters.kind(),
            parameters,
            status: JobStatus::Pending,
            total: 0,
            processed: 0,
            succeeded: 0,
            failed: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            epoch: 1,
            history: Vec::new(),
        }
    }

    /// `processed / total * 100`, rounded to two decimals.
    pub fn progress_percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let pct = self.processed as f64 / self.total as f64 * 100.0;
        (pct * 100.0).round() / 100.0
    }

    pub fn is_claimable(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Restart is allowed after a systemic failure or a completion with failures.
    pub fn is_restartable(&self) -> bool {
        match self.status {
            JobStatus::Failed => true,
            JobStatus::Completed => self.failed > 0,
            _ => false,
        }
    }

    /// First claim of an epoch.
    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        if self.status == JobStatus::Pending {
            self.status = JobStatus::Running;
            self.started_at = Some(now);
        }
    }

    /// Fold a task outcome into the counters and settle the status.
    pub fn record(&mut self, outcome: TaskOutcome, now: DateTime<Utc>) {
        match outcome {
            TaskOutcome::Succeeded => {
                self.succeeded += 1;
                self.processed += 1;
            }
            TaskOutcome::Failed => {
                self.failed += 1;
                self.processed += 1;
            }
            TaskOutcome::Requeued => {}
        }
        self.settle(now);
    }

    /// Complete the job once every task is terminal.
    pub fn settle(&mut self, now: DateTime<Utc>) {
        if !self.status.is_terminal() && self.total > 0 && self.processed >= self.total {
            self.status = JobStatus::Completed;
            self.started_at.get_or_insert(now);
            self.completed_at = Some(now);
        }
    }

    /// Stop the job after a systemic fault. No-op once terminal.
    pub fn mark_failed(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Failed;
        self.error_message = Some(message.into());
        self.completed_at = Some(now);
        true
    }

    /// Archive the current epoch and open the next one.
    ///
    /// `rearmed` is the number of failed tasks moved back to pending.
    pub fn begin_epoch(&mut self, rearmed: u64, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.is_restartable() {
            return Err(DomainError::invalid_state(format!(
                "job {} is {} with {} failed task(s); nothing to restart",
                self.id, self.status, self.failed
            )));
        }
        self.history.push(JobRun {
            epoch: self.epoch,
            status: self.status,
            started_at: self.started_at,
            completed_at: self.completed_at,
            succeeded: self.succeeded,
            failed: self.failed,
            error_message: self.error_message.clone(),
            archived_at: now,
        });
        self.epoch += 1;
        self.failed = self.failed.saturating_sub(rearmed);
        self.processed = self.processed.saturating_sub(rearmed);
        self.status = JobStatus::Pending;
        self.started_at = None;
        self.completed_at = None;
        self.error_message = None;
        self.settle(now);
        Ok(())
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(attempt-1)
    #[default]
    Exponential,
}

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts per task per epoch, first attempt included
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0) applied symmetrically around the delay
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Create a policy with fixed delays.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Undisturbed delay for a given attempt number (1-indexed).
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi(attempt.saturating_sub(1).min(62) as i32);
                (base_ms * exp).min(max_ms)
            }
        };

        Duration::from_millis(delay_ms.max(0.0) as u64)
    }

    /// Delay for a given attempt number (1-indexed), with random jitter.
    ///
    /// Never exceeds `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_for_attempt(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = 1.0 + rand::rng().random_range(-jitter..=jitter);
        delay.mul_f64(factor).min(self.max_delay)
    }

    /// Check whether another attempt is allowed after `attempt` attempts.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
