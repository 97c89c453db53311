//! Postgres-backed job store.
//!
//! Durable counterpart of the in-memory store. Claims use
//! `FOR UPDATE SKIP LOCKED` so concurrent workers (or processes) never pick
//! the same task; every task transition locks its job row and rewrites the
//! counters in the same transaction.
//!
//! ## Lock order
//!
//! Operations that touch a task and its job lock the task row first and the
//! job row second. `restart_failed` only touches `failed` rows, which no
//! worker holds, so it may lock the job first.
//!
//! ## Error Mapping
//!
//! | SQLx Error | JobStoreError |
//! |------------|---------------|
//! | Database (unique violation `23505`) | `Storage` (duplicate id) |
//! | Database (other) | `Storage` |
//! | PoolClosed | `Storage` |
//! | Other | `Storage` |

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use dirbatch_core::{EmailAddress, EntityKey, JobId, TaskId};

use super::store::{
    ClaimedTask, JobFilter, JobStore, JobStoreError, RestartOutcome, TaskCounts,
};
use super::types::{
    Job, JobKind, JobRun, JobStatus, Task, TaskAction, TaskClaim, TaskError, TaskStatus,
    TaskTransition,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS dirbatch_jobs (
        id UUID PRIMARY KEY,
        kind TEXT NOT NULL,
        parameters JSONB NOT NULL,
        status TEXT NOT NULL,
        total BIGINT NOT NULL,
        processed BIGINT NOT NULL DEFAULT 0,
        succeeded BIGINT NOT NULL DEFAULT 0,
        failed BIGINT NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL,
        started_at TIMESTAMPTZ,
        completed_at TIMESTAMPTZ,
        error_message TEXT,
        epoch INTEGER NOT NULL DEFAULT 1,
        history JSONB NOT NULL DEFAULT '[]'::jsonb,
        CHECK (processed = succeeded + failed AND processed <= total)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS dirbatch_jobs_created_idx ON dirbatch_jobs (created_at DESC, id DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS dirbatch_tasks (
        id UUID PRIMARY KEY,
        job_id UUID NOT NULL REFERENCES dirbatch_jobs (id),
        seq BIGSERIAL,
        subject TEXT NOT NULL,
        scope TEXT NOT NULL,
        action TEXT NOT NULL,
        status TEXT NOT NULL,
        attempt_count INTEGER NOT NULL DEFAULT 0,
        last_error JSONB,
        result JSONB,
        not_before TIMESTAMPTZ,
        claim_token UUID,
        claim_worker TEXT,
        lease_expires_at TIMESTAMPTZ,
        epoch INTEGER NOT NULL DEFAULT 1,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS dirbatch_tasks_ready_idx ON dirbatch_tasks (status, not_before, seq)",
    "CREATE INDEX IF NOT EXISTS dirbatch_tasks_job_idx ON dirbatch_tasks (job_id, seq)",
    "CREATE INDEX IF NOT EXISTS dirbatch_tasks_lease_idx ON dirbatch_tasks (lease_expires_at) WHERE status = 'processing'",
];

const JOB_COLUMNS: &str = "id, kind, parameters, status, total, processed, succeeded, failed, \
     created_at, started_at, completed_at, error_message, epoch, history";

const TASK_COLUMNS: &str = "id, job_id, subject, scope, action, status, attempt_count, last_error, \
     result, not_before, claim_token, claim_worker, lease_expires_at, epoch, updated_at";

/// Rows inserted per statement when creating tasks.
const INSERT_CHUNK: usize = 1000;

#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    kind: String,
    parameters: serde_json::Value,
    status: String,
    total: i64,
    processed: i64,
    succeeded: i64,
    failed: i64,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    epoch: i32,
    history: serde_json::Value,
}

impl TryFrom<JobRow> for Job {
    type Error = JobStoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let history: Vec<JobRun> = serde_json::from_value(row.history)
            .map_err(|e| corrupt("job history", e))?;
        Ok(Job {
            id: JobId::from_uuid(row.id),
            kind: JobKind::from_str(&row.kind).map_err(|e| corrupt("job kind", e))?,
            parameters: serde_json::from_value(row.parameters)
                .map_err(|e| corrupt("job parameters", e))?,
            status: JobStatus::from_str(&row.status).map_err(|e| corrupt("job status", e))?,
            total: row.total as u64,
            processed: row.processed as u64,
            succeeded: row.succeeded as u64,
            failed: row.failed as u64,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
            epoch: row.epoch as u32,
            history,
        })
    }
}

#[derive(Debug, FromRow)]
struct TaskRow {
    id: Uuid,
    job_id: Uuid,
    subject: String,
    scope: String,
    action: String,
    status: String,
    attempt_count: i32,
    last_error: Option<serde_json::Value>,
    result: Option<serde_json::Value>,
    not_before: Option<DateTime<Utc>>,
    claim_token: Option<Uuid>,
    claim_worker: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>,
    epoch: i32,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = JobStoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let last_error: Option<TaskError> = row
            .last_error
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| corrupt("task error", e))?;
        let claim = match (row.claim_token, row.claim_worker, row.lease_expires_at) {
            (Some(token), Some(worker), Some(lease_expires_at)) => Some(TaskClaim {
                token,
                worker,
                lease_expires_at,
            }),
            _ => None,
        };
        Ok(Task {
            id: TaskId::from_uuid(row.id),
            job_id: JobId::from_uuid(row.job_id),
            entity_key: EntityKey::new(
                EmailAddress::parse(&row.subject).map_err(|e| corrupt("task subject", e))?,
                row.scope,
            ),
            action: TaskAction::from_str(&row.action).map_err(|e| corrupt("task action", e))?,
            status: TaskStatus::from_str(&row.status).map_err(|e| corrupt("task status", e))?,
            attempt_count: row.attempt_count as u32,
            last_error,
            result: row.result,
            not_before: row.not_before,
            claim,
            epoch: row.epoch as u32,
            updated_at: row.updated_at,
        })
    }
}

fn corrupt(what: &str, err: impl std::fmt::Display) -> JobStoreError {
    JobStoreError::Storage(format!("failed to decode {what}: {err}"))
}

/// Postgres-backed job store.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    /// Create a new store with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create tables and indexes if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), JobStoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, JobStoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

async fn commit(tx: Transaction<'static, Postgres>) -> Result<(), JobStoreError> {
    tx.commit()
        .await
        .map_err(|e| map_sqlx_error("commit_transaction", e))
}

async fn lock_job(
    tx: &mut Transaction<'static, Postgres>,
    job_id: JobId,
) -> Result<Job, JobStoreError> {
    let row = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {JOB_COLUMNS} FROM dirbatch_jobs WHERE id = $1 FOR UPDATE"
    ))
    .bind(job_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_job", e))?
    .ok_or(JobStoreError::JobNotFound(job_id))?;
    row.try_into()
}

async fn lock_task(
    tx: &mut Transaction<'static, Postgres>,
    task_id: TaskId,
) -> Result<Task, JobStoreError> {
    let row = sqlx::query_as::<_, TaskRow>(&format!(
        "SELECT {TASK_COLUMNS} FROM dirbatch_tasks WHERE id = $1 FOR UPDATE"
    ))
    .bind(task_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_task", e))?
    .ok_or(JobStoreError::TaskNotFound(task_id))?;
    row.try_into()
}

async fn write_job(tx: &mut Transaction<'static, Postgres>, job: &Job) -> Result<(), JobStoreError> {
    let history =
        serde_json::to_value(&job.history).map_err(|e| JobStoreError::Storage(e.to_string()))?;
    sqlx::query(
        r#"
        UPDATE dirbatch_jobs SET
            status = $2,
            total = $3,
            processed = $4,
            succeeded = $5,
            failed = $6,
            started_at = $7,
            completed_at = $8,
            error_message = $9,
            epoch = $10,
            history = $11
        WHERE id = $1
        "#,
    )
    .bind(job.id.as_uuid())
    .bind(job.status.as_str())
    .bind(job.total as i64)
    .bind(job.processed as i64)
    .bind(job.succeeded as i64)
    .bind(job.failed as i64)
    .bind(job.started_at)
    .bind(job.completed_at)
    .bind(job.error_message.as_deref())
    .bind(job.epoch as i32)
    .bind(history)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("write_job", e))?;
    Ok(())
}

async fn write_task(
    tx: &mut Transaction<'static, Postgres>,
    task: &Task,
) -> Result<(), JobStoreError> {
    let last_error = task
        .last_error
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| JobStoreError::Storage(e.to_string()))?;
    sqlx::query(
        r#"
        UPDATE dirbatch_tasks SET
            status = $2,
            attempt_count = $3,
            last_error = $4,
            result = $5,
            not_before = $6,
            claim_token = $7,
            claim_worker = $8,
            lease_expires_at = $9,
            epoch = $10,
            updated_at = $11
        WHERE id = $1
        "#,
    )
    .bind(task.id.as_uuid())
    .bind(task.status.as_str())
    .bind(task.attempt_count as i32)
    .bind(last_error)
    .bind(task.result.clone())
    .bind(task.not_before)
    .bind(task.claim.as_ref().map(|c| c.token))
    .bind(task.claim.as_ref().map(|c| c.worker.clone()))
    .bind(task.claim.as_ref().map(|c| c.lease_expires_at))
    .bind(task.epoch as i32)
    .bind(task.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("write_task", e))?;
    Ok(())
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job, tasks), fields(job_id = %job.id, task_count = tasks.len()), err)]
    async fn create_job(&self, mut job: Job, tasks: Vec<Task>) -> Result<Job, JobStoreError> {
        job.total = tasks.len() as u64;
        let parameters = serde_json::to_value(&job.parameters)
            .map_err(|e| JobStoreError::Storage(e.to_string()))?;
        let history =
            serde_json::to_value(&job.history).map_err(|e| JobStoreError::Storage(e.to_string()))?;

        let mut tx = self.begin().await?;
        sqlx::query(&format!(
            "INSERT INTO dirbatch_jobs ({JOB_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        ))
        .bind(job.id.as_uuid())
        .bind(job.kind.as_str())
        .bind(parameters)
        .bind(job.status.as_str())
        .bind(job.total as i64)
        .bind(job.processed as i64)
        .bind(job.succeeded as i64)
        .bind(job.failed as i64)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.error_message.as_deref())
        .bind(job.epoch as i32)
        .bind(history)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                JobStoreError::AlreadyExists(job.id)
            } else {
                map_sqlx_error("insert_job", e)
            }
        })?;

        for chunk in tasks.chunks(INSERT_CHUNK) {
            if let Some(stray) = chunk.iter().find(|t| t.job_id != job.id) {
                return Err(JobStoreError::InvalidState(format!(
                    "task {} belongs to job {}",
                    stray.id, stray.job_id
                )));
            }
            let ids: Vec<Uuid> = chunk.iter().map(|t| *t.id.as_uuid()).collect();
            let subjects: Vec<String> = chunk
                .iter()
                .map(|t| t.entity_key.subject.to_string())
                .collect();
            let scopes: Vec<String> = chunk.iter().map(|t| t.entity_key.scope.clone()).collect();
            let actions: Vec<String> = chunk.iter().map(|t| t.action.as_str().to_string()).collect();

            sqlx::query(
                r#"
                INSERT INTO dirbatch_tasks (id, job_id, subject, scope, action, status, epoch, updated_at)
                SELECT t.id, $5, t.subject, t.scope, t.action, 'pending', $6, $7
                FROM UNNEST($1::uuid[], $2::text[], $3::text[], $4::text[])
                    WITH ORDINALITY AS t(id, subject, scope, action, ord)
                ORDER BY t.ord
                "#,
            )
            .bind(ids)
            .bind(subjects)
            .bind(scopes)
            .bind(actions)
            .bind(job.id.as_uuid())
            .bind(job.epoch as i32)
            .bind(job.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_tasks", e))?;
        }

        commit(tx).await?;
        Ok(job)
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn get_job(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM dirbatch_jobs WHERE id = $1"
        ))
        .bind(job_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_job", e))?
        .ok_or(JobStoreError::JobNotFound(job_id))?;
        row.try_into()
    }

    #[instrument(skip(self), err)]
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM dirbatch_jobs \
             WHERE ($1::text IS NULL OR kind = $1) AND ($2::text IS NULL OR status = $2) \
             ORDER BY created_at DESC, id DESC LIMIT $3"
        ))
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_jobs", e))?;
        rows.into_iter().map(Job::try_from).collect()
    }

    #[instrument(skip(self), fields(task_id = tracing::field::Empty), err)]
    async fn claim_next(
        &self,
        worker: &str,
        lease: Duration,
    ) -> Result<Option<ClaimedTask>, JobStoreError> {
        let now = Utc::now();
        let mut tx = self.begin().await?;

        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {cols} FROM dirbatch_tasks t \
             WHERE t.status = 'pending' \
               AND (t.not_before IS NULL OR t.not_before <= $1) \
               AND EXISTS (SELECT 1 FROM dirbatch_jobs j \
                           WHERE j.id = t.job_id AND j.status IN ('pending', 'running')) \
             ORDER BY t.seq \
             LIMIT 1 \
             FOR UPDATE OF t SKIP LOCKED",
            cols = TASK_COLUMNS
                .split(", ")
                .map(|c| format!("t.{}", c.trim()))
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("select_claimable", e))?;

        let Some(row) = row else {
            commit(tx).await?;
            return Ok(None);
        };
        let mut task: Task = row.try_into()?;
        Span::current().record("task_id", tracing::field::display(task.id));

        let mut job = lock_job(&mut tx, task.job_id).await?;
        if !job.is_claimable() {
            // The job failed between the scan and the lock.
            commit(tx).await?;
            return Ok(None);
        }

        let claim = task.claim(worker, lease, now);
        job.mark_running(now);
        write_task(&mut tx, &task).await?;
        write_job(&mut tx, &job).await?;
        commit(tx).await?;

        Ok(Some(ClaimedTask {
            task,
            claim,
            parameters: job.parameters,
        }))
    }

    #[instrument(skip(self, transition), fields(task_id = %task_id), err)]
    async fn complete_task(
        &self,
        task_id: TaskId,
        token: Uuid,
        transition: TaskTransition,
    ) -> Result<Task, JobStoreError> {
        let now = Utc::now();
        let mut tx = self.begin().await?;

        let mut task = lock_task(&mut tx, task_id).await?;
        if !task.holds_claim(token) {
            return Err(JobStoreError::StaleClaim(task_id));
        }
        let mut job = lock_job(&mut tx, task.job_id).await?;

        let outcome = task.apply(transition, now);
        job.record(outcome, now);
        write_task(&mut tx, &task).await?;
        write_job(&mut tx, &job).await?;
        commit(tx).await?;
        Ok(task)
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn fail_job(&self, job_id: JobId, message: &str) -> Result<Job, JobStoreError> {
        let mut tx = self.begin().await?;
        let mut job = lock_job(&mut tx, job_id).await?;
        if job.mark_failed(message, Utc::now()) {
            write_job(&mut tx, &job).await?;
        }
        commit(tx).await?;
        Ok(job)
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn list_tasks(
        &self,
        job_id: JobId,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>, JobStoreError> {
        self.get_job(job_id).await?;
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM dirbatch_tasks \
             WHERE job_id = $1 AND ($2::text IS NULL OR status = $2) \
             ORDER BY seq"
        ))
        .bind(job_id.as_uuid())
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_tasks", e))?;
        rows.into_iter().map(Task::try_from).collect()
    }

    #[instrument(skip(self), fields(job_id = %job_id, rearmed = tracing::field::Empty), err)]
    async fn restart_failed(&self, job_id: JobId) -> Result<RestartOutcome, JobStoreError> {
        let now = Utc::now();
        let mut tx = self.begin().await?;
        let mut job = lock_job(&mut tx, job_id).await?;
        if !job.is_restartable() {
            return Err(JobStoreError::InvalidState(format!(
                "job {} is {} with {} failed task(s)",
                job.id, job.status, job.failed
            )));
        }

        let rearmed = sqlx::query(
            r#"
            UPDATE dirbatch_tasks SET
                status = 'pending',
                attempt_count = 0,
                last_error = NULL,
                not_before = NULL,
                epoch = $2,
                updated_at = $3
            WHERE job_id = $1 AND status = 'failed'
            "#,
        )
        .bind(job_id.as_uuid())
        .bind((job.epoch + 1) as i32)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("rearm_tasks", e))?
        .rows_affected();
        Span::current().record("rearmed", rearmed);

        job.begin_epoch(rearmed, now)
            .map_err(|e| JobStoreError::InvalidState(e.to_string()))?;
        write_job(&mut tx, &job).await?;
        commit(tx).await?;
        Ok(RestartOutcome { job, rearmed })
    }

    #[instrument(skip(self), fields(reclaimed = tracing::field::Empty), err)]
    async fn reclaim_expired(
        &self,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<usize, JobStoreError> {
        let mut tx = self.begin().await?;
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM dirbatch_tasks \
             WHERE status = 'processing' AND lease_expires_at <= $1 \
             ORDER BY job_id, seq \
             FOR UPDATE SKIP LOCKED"
        ))
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("select_expired", e))?;

        let count = rows.len();
        for row in rows {
            let mut task: Task = row.try_into()?;
            let mut job = lock_job(&mut tx, task.job_id).await?;
            let outcome = task.expire_claim(max_attempts, now);
            job.record(outcome, now);
            write_task(&mut tx, &task).await?;
            write_job(&mut tx, &job).await?;
        }
        commit(tx).await?;
        Span::current().record("reclaimed", count as u64);
        Ok(count)
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn task_counts(&self, job_id: JobId) -> Result<TaskCounts, JobStoreError> {
        Ok(self.job_with_counts(job_id).await?.1)
    }

    #[instrument(skip(self), err)]
    async fn job_with_counts(&self, job_id: JobId) -> Result<(Job, TaskCounts), JobStoreError> {
        let mut tx = self.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("job_with_counts", e))?;

        let job: Job = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM dirbatch_jobs WHERE id = $1"
        ))
        .bind(job_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("job_with_counts", e))?
        .ok_or(JobStoreError::JobNotFound(job_id))?
        .try_into()?;

        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM dirbatch_tasks WHERE job_id = $1 GROUP BY status",
        )
        .bind(job_id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("job_with_counts", e))?;
        commit(tx).await?;

        let mut counts = TaskCounts::default();
        for (status, n) in rows {
            let n = n as u64;
            match TaskStatus::from_str(&status).map_err(|e| corrupt("task status", e))? {
                TaskStatus::Pending => counts.pending = n,
                TaskStatus::Processing => counts.processing = n,
                TaskStatus::Success => counts.success = n,
                TaskStatus::Failed => counts.failed = n,
            }
            counts.total += n;
        }
        Ok((job, counts))
    }
}

/// Map SQLx errors to JobStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            JobStoreError::Storage(format!(
                "database error in {operation} ({code}): {}",
                db_err.message()
            ))
        }
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        _ => JobStoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}
