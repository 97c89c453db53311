//! Job storage: the trait every backend implements and the in-memory backend.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use dirbatch_core::{JobId, TaskId};

use super::types::{
    Job, JobKind, JobParameters, JobStatus, Task, TaskClaim, TaskStatus, TaskTransition,
};

/// Default page size for [`JobFilter`].
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Job store abstraction.
///
/// Every method that moves a task also updates its job's counters and status
/// in the same atomic step, so readers never observe one without the other.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a job together with its fully enumerated tasks.
    async fn create_job(&self, job: Job, tasks: Vec<Task>) -> Result<Job, JobStoreError>;

    /// Get a job by ID.
    async fn get_job(&self, job_id: JobId) -> Result<Job, JobStoreError>;

    /// List jobs, newest first.
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError>;

    /// Claim the next runnable task and mark it processing.
    ///
    /// Consumes one attempt and moves a pending job to running. Tasks of
    /// completed or failed jobs and tasks still backing off are skipped.
    async fn claim_next(
        &self,
        worker: &str,
        lease: Duration,
    ) -> Result<Option<ClaimedTask>, JobStoreError>;

    /// Apply a worker's outcome. Rejected with `StaleClaim` unless `token`
    /// is the task's current claim.
    async fn complete_task(
        &self,
        task_id: TaskId,
        token: Uuid,
        transition: TaskTransition,
    ) -> Result<Task, JobStoreError>;

    /// Mark a job failed after a systemic fault.
    async fn fail_job(&self, job_id: JobId, message: &str) -> Result<Job, JobStoreError>;

    /// Tasks of a job, optionally filtered by status, in creation order.
    async fn list_tasks(
        &self,
        job_id: JobId,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>, JobStoreError>;

    /// Re-arm every failed task of a restartable job and open a new epoch.
    async fn restart_failed(&self, job_id: JobId) -> Result<RestartOutcome, JobStoreError>;

    /// Revoke claims whose lease expired before `now`. Returns how many.
    async fn reclaim_expired(
        &self,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<usize, JobStoreError>;

    /// Task status breakdown for a job.
    async fn task_counts(&self, job_id: JobId) -> Result<TaskCounts, JobStoreError>;

    /// A job together with its task breakdown, read from one snapshot.
    async fn job_with_counts(&self, job_id: JobId) -> Result<(Job, TaskCounts), JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("claim on task {0} is no longer held")]
    StaleClaim(TaskId),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Filter for [`JobStore::list_jobs`].
#[derive(Debug, Clone)]
pub struct JobFilter {
    pub kind: Option<JobKind>,
    pub status: Option<JobStatus>,
    pub limit: usize,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            kind: None,
            status: None,
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        self.kind.is_none_or(|k| job.kind == k) && self.status.is_none_or(|s| job.status == s)
    }
}

/// A task handed to a worker, with what it needs to execute.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub task: Task,
    pub claim: TaskClaim,
    pub parameters: JobParameters,
}

/// Result of [`JobStore::restart_failed`].
#[derive(Debug, Clone)]
pub struct RestartOutcome {
    pub job: Job,
    pub rearmed: u64,
}

/// Task status breakdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub pending: u64,
    pub processing: u64,
    pub success: u64,
    pub failed: u64,
    pub total: u64,
}

impl TaskCounts {
    pub fn add(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Processing => self.processing += 1,
            TaskStatus::Success => self.success += 1,
            TaskStatus::Failed => self.failed += 1,
        }
        self.total += 1;
    }
}

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<JobId, Job>,
    tasks: HashMap<TaskId, Task>,
    job_tasks: HashMap<JobId, Vec<TaskId>>,
    /// Pending tasks of claimable jobs, ordered by (ready_at, enqueue sequence).
    ready: BTreeSet<(DateTime<Utc>, u64, TaskId)>,
    seq: u64,
}

impl State {
    /// Queue a pending task. Tasks of terminal jobs stay parked until restart.
    fn enqueue(&mut self, task: &Task) {
        if !self.jobs.get(&task.job_id).is_some_and(Job::is_claimable) {
            return;
        }
        self.seq += 1;
        self.ready.insert((task.ready_at(), self.seq, task.id));
    }

    /// Drop every queued task of `job_id`.
    fn park(&mut self, job_id: JobId) {
        let Some(ids) = self.job_tasks.get(&job_id) else {
            return;
        };
        let ids: HashSet<TaskId> = ids.iter().copied().collect();
        self.ready.retain(|(_, _, task_id)| !ids.contains(task_id));
    }

    fn counts(&self, job_id: JobId) -> Result<TaskCounts, JobStoreError> {
        let ids = self
            .job_tasks
            .get(&job_id)
            .ok_or(JobStoreError::JobNotFound(job_id))?;
        let mut counts = TaskCounts::default();
        for task in ids.iter().filter_map(|id| self.tasks.get(id)) {
            counts.add(task.status);
        }
        Ok(counts)
    }

    fn job_mut(&mut self, job_id: JobId) -> Result<&mut Job, JobStoreError> {
        self.jobs
            .get_mut(&job_id)
            .ok_or(JobStoreError::JobNotFound(job_id))
    }
}

/// In-memory job store for tests/dev.
///
/// A single lock serializes claims and counter updates.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    state: RwLock<State>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, JobStoreError> {
        self.state
            .read()
            .map_err(|_| JobStoreError::Storage("job store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, JobStoreError> {
        self.state
            .write()
            .map_err(|_| JobStoreError::Storage("job store lock poisoned".into()))
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(&self, mut job: Job, tasks: Vec<Task>) -> Result<Job, JobStoreError> {
        let mut state = self.write()?;
        if state.jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        if let Some(stray) = tasks.iter().find(|t| t.job_id != job.id) {
            return Err(JobStoreError::InvalidState(format!(
                "task {} belongs to job {}",
                stray.id, stray.job_id
            )));
        }

        job.total = tasks.len() as u64;
        state.jobs.insert(job.id, job.clone());
        let mut ids = Vec::with_capacity(tasks.len());
        for task in tasks {
            state.enqueue(&task);
            ids.push(task.id);
            state.tasks.insert(task.id, task);
        }
        state.job_tasks.insert(job.id, ids);
        Ok(job)
    }

    async fn get_job(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        self.read()?
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or(JobStoreError::JobNotFound(job_id))
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError> {
        let state = self.read()?;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| filter.matches(j))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        jobs.truncate(filter.limit);
        Ok(jobs)
    }

    async fn claim_next(
        &self,
        worker: &str,
        lease: Duration,
    ) -> Result<Option<ClaimedTask>, JobStoreError> {
        let mut state = self.write()?;
        let now = Utc::now();

        let entry = state
            .ready
            .iter()
            .take_while(|(ready_at, _, _)| *ready_at <= now)
            .find(|(_, _, task_id)| {
                state
                    .tasks
                    .get(task_id)
                    .and_then(|t| state.jobs.get(&t.job_id))
                    .is_some_and(Job::is_claimable)
            })
            .copied();
        let Some(entry) = entry else {
            return Ok(None);
        };
        state.ready.remove(&entry);
        let task_id = entry.2;

        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or(JobStoreError::TaskNotFound(task_id))?;
        let claim = task.claim(worker, lease, now);
        let task = task.clone();

        let job = state.job_mut(task.job_id)?;
        job.mark_running(now);
        let parameters = job.parameters.clone();

        Ok(Some(ClaimedTask {
            task,
            claim,
            parameters,
        }))
    }

    async fn complete_task(
        &self,
        task_id: TaskId,
        token: Uuid,
        transition: TaskTransition,
    ) -> Result<Task, JobStoreError> {
        let mut state = self.write()?;
        let now = Utc::now();

        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or(JobStoreError::TaskNotFound(task_id))?;
        if !task.holds_claim(token) {
            return Err(JobStoreError::StaleClaim(task_id));
        }
        let outcome = task.apply(transition, now);
        let task = task.clone();

        state.job_mut(task.job_id)?.record(outcome, now);
        if task.status == TaskStatus::Pending {
            state.enqueue(&task);
        }
        Ok(task)
    }

    async fn fail_job(&self, job_id: JobId, message: &str) -> Result<Job, JobStoreError> {
        let mut state = self.write()?;
        let job = state.job_mut(job_id)?;
        job.mark_failed(message, Utc::now());
        let job = job.clone();
        state.park(job_id);
        Ok(job)
    }

    async fn list_tasks(
        &self,
        job_id: JobId,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>, JobStoreError> {
        let state = self.read()?;
        let ids = state
            .job_tasks
            .get(&job_id)
            .ok_or(JobStoreError::JobNotFound(job_id))?;
        Ok(ids
            .iter()
            .filter_map(|id| state.tasks.get(id))
            .filter(|t| status.is_none_or(|s| t.status == s))
            .cloned()
            .collect())
    }

    async fn restart_failed(&self, job_id: JobId) -> Result<RestartOutcome, JobStoreError> {
        let mut state = self.write()?;
        let now = Utc::now();

        let job = state.job_mut(job_id)?;
        if !job.is_restartable() {
            return Err(JobStoreError::InvalidState(format!(
                "job {} is {} with {} failed task(s)",
                job.id, job.status, job.failed
            )));
        }
        let epoch = job.epoch + 1;

        let ids = state.job_tasks.get(&job_id).cloned().unwrap_or_default();
        let mut rearmed = 0u64;
        for id in &ids {
            if let Some(task) = state.tasks.get_mut(id) {
                if task.rearm(epoch, now) {
                    rearmed += 1;
                }
            }
        }

        let job = state.job_mut(job_id)?;
        job.begin_epoch(rearmed, now)
            .map_err(|e| JobStoreError::InvalidState(e.to_string()))?;
        let job = job.clone();

        // Re-armed tasks plus any released while the job was parked.
        let pending: Vec<Task> = ids
            .iter()
            .filter_map(|id| state.tasks.get(id))
            .filter(|t| t.status == TaskStatus::Pending)
            .cloned()
            .collect();
        for task in &pending {
            state.enqueue(task);
        }
        Ok(RestartOutcome { job, rearmed })
    }

    async fn reclaim_expired(
        &self,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<usize, JobStoreError> {
        let mut state = self.write()?;
        let expired: Vec<TaskId> = state
            .tasks
            .values()
            .filter(|t| t.lease_expired(now))
            .map(|t| t.id)
            .collect();

        for task_id in &expired {
            let Some(task) = state.tasks.get_mut(task_id) else {
                continue;
            };
            let outcome = task.expire_claim(max_attempts, now);
            let task = task.clone();
            state.job_mut(task.job_id)?.record(outcome, now);
            if task.status == TaskStatus::Pending {
                state.enqueue(&task);
            }
        }
        Ok(expired.len())
    }

    async fn task_counts(&self, job_id: JobId) -> Result<TaskCounts, JobStoreError> {
        self.read()?.counts(job_id)
    }

    async fn job_with_counts(&self, job_id: JobId) -> Result<(Job, TaskCounts), JobStoreError> {
        let state = self.read()?;
        let job = state
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or(JobStoreError::JobNotFound(job_id))?;
        Ok((job, state.counts(job_id)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::{ErrorClass, TaskAction, TaskError};
    use dirbatch_core::{EmailAddress, EntityKey, OuPath};

    const LEASE: Duration = Duration::from_secs(30);

    fn params() -> JobParameters {
        JobParameters::AttributeInjection {
            ou_paths: vec![OuPath::parse("/Staff").unwrap()],
            attribute: "title".into(),
            value: "Teacher".into(),
        }
    }

    async fn seed(store: &InMemoryJobStore, n: usize) -> Job {
        let job = Job::new(params());
        let tasks = (0..n)
            .map(|i| {
                let email = EmailAddress::parse(format!("user{i}@example.org")).unwrap();
                Task::new(job.id, EntityKey::new(email, "/Staff"), TaskAction::PatchAttribute)
            })
            .collect();
        store.create_job(job, tasks).await.unwrap()
    }

    fn failed(msg: &str) -> TaskTransition {
        TaskTransition::Failed {
            error: TaskError::new(ErrorClass::Permanent, msg),
        }
    }

    #[tokio::test]
    async fn create_and_claim() {
        let store = InMemoryJobStore::new();
        let job = seed(&store, 2).await;
        assert_eq!(job.total, 2);

        let claimed = store.claim_next("w-1", LEASE).await.unwrap().unwrap();
        assert_eq!(claimed.task.status, TaskStatus::Processing);
        assert_eq!(claimed.task.attempt_count, 1);
        assert_eq!(claimed.parameters, params());

        let job = store.get_job(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());

        let counts = store.task_counts(job.id).await.unwrap();
        assert_eq!((counts.pending, counts.processing, counts.total), (1, 1, 2));
    }

    #[tokio::test]
    async fn tasks_are_claimed_once() {
        let store = InMemoryJobStore::new();
        seed(&store, 3).await;
        let mut seen = std::collections::HashSet::new();
        while let Some(claimed) = store.claim_next("w-1", LEASE).await.unwrap() {
            assert!(seen.insert(claimed.task.id));
        }
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn stale_claim_is_rejected() {
        let store = InMemoryJobStore::new();
        seed(&store, 1).await;
        let claimed = store.claim_next("w-1", LEASE).await.unwrap().unwrap();

        let err = store
            .complete_task(claimed.task.id, Uuid::now_v7(), TaskTransition::Released)
            .await
            .unwrap_err();
        assert!(matches!(err, JobStoreError::StaleClaim(_)));

        store
            .complete_task(
                claimed.task.id,
                claimed.claim.token,
                TaskTransition::Succeeded { output: None },
            )
            .await
            .unwrap();
        let again = store
            .complete_task(claimed.task.id, claimed.claim.token, failed("late"))
            .await
            .unwrap_err();
        assert!(matches!(again, JobStoreError::StaleClaim(_)));
    }

    #[tokio::test]
    async fn retry_waits_for_not_before() {
        let store = InMemoryJobStore::new();
        seed(&store, 1).await;
        let claimed = store.claim_next("w-1", LEASE).await.unwrap().unwrap();
        store
            .complete_task(
                claimed.task.id,
                claimed.claim.token,
                TaskTransition::Retry {
                    error: TaskError::new(ErrorClass::Quota, "429"),
                    not_before: Utc::now() + chrono::Duration::hours(1),
                },
            )
            .await
            .unwrap();
        assert!(store.claim_next("w-1", LEASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn counters_and_completion() {
        let store = InMemoryJobStore::new();
        let job = seed(&store, 3).await;
        for i in 0..3 {
            let c = store.claim_next("w-1", LEASE).await.unwrap().unwrap();
            let transition = if i == 1 {
                failed("user not found")
            } else {
                TaskTransition::Succeeded { output: None }
            };
            store
                .complete_task(c.task.id, c.claim.token, transition)
                .await
                .unwrap();
        }
        let job = store.get_job(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!((job.total, job.processed, job.succeeded, job.failed), (3, 3, 2, 1));

        let failed_tasks = store
            .list_tasks(job.id, Some(TaskStatus::Failed))
            .await
            .unwrap();
        assert_eq!(failed_tasks.len(), 1);
        assert_eq!(
            failed_tasks[0].last_error.as_ref().unwrap().message,
            "user not found"
        );
    }

    #[tokio::test]
    async fn job_and_counts_agree() {
        let store = InMemoryJobStore::new();
        let job = seed(&store, 4).await;
        let a = store.claim_next("w-1", LEASE).await.unwrap().unwrap();
        store
            .complete_task(a.task.id, a.claim.token, TaskTransition::Succeeded { output: None })
            .await
            .unwrap();
        let b = store.claim_next("w-1", LEASE).await.unwrap().unwrap();
        store
            .complete_task(b.task.id, b.claim.token, failed("bad value"))
            .await
            .unwrap();
        store.claim_next("w-1", LEASE).await.unwrap().unwrap();

        let (job, counts) = store.job_with_counts(job.id).await.unwrap();
        assert_eq!((job.succeeded, job.failed), (counts.success, counts.failed));
        assert_eq!(job.total, counts.total);
        assert_eq!((counts.pending, counts.processing), (1, 1));

        assert!(matches!(
            store.job_with_counts(JobId::new()).await,
            Err(JobStoreError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn failed_job_has_no_claimable_tasks() {
        let store = InMemoryJobStore::new();
        let job = seed(&store, 2).await;
        store.fail_job(job.id, "token revoked").await.unwrap();
        assert!(store.claim_next("w-1", LEASE).await.unwrap().is_none());

        let outcome = store.restart_failed(job.id).await.unwrap();
        assert_eq!(outcome.rearmed, 0);
        assert_eq!(outcome.job.epoch, 2);
        assert_eq!(outcome.job.history[0].error_message.as_deref(), Some("token revoked"));
        assert!(store.claim_next("w-1", LEASE).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_job_tasks_leave_the_ready_queue() {
        let store = InMemoryJobStore::new();
        let stuck = seed(&store, 50).await;
        let in_flight = store.claim_next("w-1", LEASE).await.unwrap().unwrap();
        store.fail_job(stuck.id, "token revoked").await.unwrap();
        assert!(store.read().unwrap().ready.is_empty());

        // The in-flight task is handed back while the job is failed.
        store
            .complete_task(in_flight.task.id, in_flight.claim.token, TaskTransition::Released)
            .await
            .unwrap();
        assert!(store.read().unwrap().ready.is_empty());

        let other = seed(&store, 1).await;
        let claimed = store.claim_next("w-1", LEASE).await.unwrap().unwrap();
        assert_eq!(claimed.task.job_id, other.id);

        store.restart_failed(stuck.id).await.unwrap();
        assert_eq!(store.read().unwrap().ready.len(), 50);
        let mut claimed = std::collections::HashSet::new();
        while let Some(c) = store.claim_next("w-1", LEASE).await.unwrap() {
            assert_eq!(c.task.job_id, stuck.id);
            assert!(claimed.insert(c.task.id));
        }
        assert_eq!(claimed.len(), 50);
    }

    #[tokio::test]
    async fn restart_rearms_only_failed_tasks() {
        let store = InMemoryJobStore::new();
        let job = seed(&store, 2).await;

        let err = store.restart_failed(job.id).await.unwrap_err();
        assert!(matches!(err, JobStoreError::InvalidState(_)));

        let a = store.claim_next("w-1", LEASE).await.unwrap().unwrap();
        store
            .complete_task(a.task.id, a.claim.token, TaskTransition::Succeeded { output: None })
            .await
            .unwrap();
        let b = store.claim_next("w-1", LEASE).await.unwrap().unwrap();
        store
            .complete_task(b.task.id, b.claim.token, failed("bad value"))
            .await
            .unwrap();

        let outcome = store.restart_failed(job.id).await.unwrap();
        assert_eq!(outcome.rearmed, 1);
        assert_eq!((outcome.job.processed, outcome.job.failed), (1, 0));

        let next = store.claim_next("w-1", LEASE).await.unwrap().unwrap();
        assert_eq!(next.task.id, b.task.id);
        assert_eq!(next.task.attempt_count, 1);
        assert_eq!(next.task.epoch, 2);
        assert!(store.claim_next("w-1", LEASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_leases_are_reclaimed() {
        let store = InMemoryJobStore::new();
        let job = seed(&store, 1).await;
        let claimed = store
            .claim_next("w-1", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(store.reclaim_expired(Utc::now(), 5).await.unwrap(), 0);
        let later = Utc::now() + chrono::Duration::seconds(5);
        assert_eq!(store.reclaim_expired(later, 5).await.unwrap(), 1);

        let tasks = store.list_tasks(job.id, None).await.unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Pending);
        assert_eq!(
            tasks[0].last_error.as_ref().unwrap().class,
            ErrorClass::LeaseExpired
        );

        let err = store
            .complete_task(claimed.task.id, claimed.claim.token, TaskTransition::Released)
            .await
            .unwrap_err();
        assert!(matches!(err, JobStoreError::StaleClaim(_)));
    }

    #[tokio::test]
    async fn list_jobs_filters_and_limits() {
        let store = InMemoryJobStore::new();
        let first = seed(&store, 1).await;
        let second = seed(&store, 1).await;
        store.fail_job(first.id, "boom").await.unwrap();

        let all = store.list_jobs(&JobFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let failed = store
            .list_jobs(&JobFilter {
                status: Some(JobStatus::Failed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, first.id);

        let limited = store
            .list_jobs(&JobFilter {
                limit: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert!(limited[0].id == first.id || limited[0].id == second.id);

        let none = store
            .list_jobs(&JobFilter {
                kind: Some(JobKind::GroupSync),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let store = InMemoryJobStore::new();
        let id = JobId::new();
        assert!(matches!(
            store.get_job(id).await,
            Err(JobStoreError::JobNotFound(_))
        ));
        assert!(matches!(
            store.task_counts(id).await,
            Err(JobStoreError::JobNotFound(_))
        ));
    }
}
