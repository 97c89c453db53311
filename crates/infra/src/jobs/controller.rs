//! Job Controller: the operations the HTTP surface exposes.

use std::sync::Arc;

use tracing::{info, warn};

use dirbatch_core::{DomainError, JobId};

use crate::directory::{DirectoryClient, DirectoryError};

use super::expansion::{self, ExpansionError};
use super::store::{JobFilter, JobStore, JobStoreError, RestartOutcome, TaskCounts};
use super::types::{Job, JobParameters, Task, TaskStatus};

/// Controller error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ControllerError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("directory error: {0}")]
    Upstream(DirectoryError),
    #[error("storage error: {0}")]
    Store(JobStoreError),
}

impl From<JobStoreError> for ControllerError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::JobNotFound(id) => ControllerError::NotFound(id),
            JobStoreError::InvalidState(msg) => ControllerError::InvalidState(msg),
            other => ControllerError::Store(other),
        }
    }
}

impl From<DomainError> for ControllerError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidState(msg) => ControllerError::InvalidState(msg),
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                ControllerError::Validation(msg)
            }
            DomainError::NotFound => ControllerError::Validation("referenced entity not found".into()),
        }
    }
}

impl From<ExpansionError> for ControllerError {
    fn from(err: ExpansionError) -> Self {
        match err {
            ExpansionError::Invalid(e) => e.into(),
            ExpansionError::Upstream(e) => ControllerError::Upstream(e),
        }
    }
}

/// Creates, inspects and restarts jobs.
#[derive(Clone)]
pub struct JobController {
    store: Arc<dyn JobStore>,
    directory: Arc<dyn DirectoryClient>,
}

impl JobController {
    pub fn new(store: Arc<dyn JobStore>, directory: Arc<dyn DirectoryClient>) -> Self {
        Self { store, directory }
    }

    /// Validate, expand and persist a job with all of its tasks.
    ///
    /// Nothing is persisted when validation or scope resolution fails.
    pub async fn create_job(&self, parameters: JobParameters) -> Result<Job, ControllerError> {
        let job = Job::new(parameters);
        let tasks = match expansion::expand(self.directory.as_ref(), job.id, &job.parameters).await
        {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(kind = %job.kind, error = %e, "job rejected");
                return Err(e.into());
            }
        };
        let job = self.store.create_job(job, tasks).await?;
        info!(job_id = %job.id, kind = %job.kind, total = job.total, "job created");
        Ok(job)
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<Job, ControllerError> {
        Ok(self.store.get_job(job_id).await?)
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, ControllerError> {
        Ok(self.store.list_jobs(filter).await?)
    }

    /// Failed tasks of the current epoch, with their last error.
    pub async fn list_failed_tasks(&self, job_id: JobId) -> Result<Vec<Task>, ControllerError> {
        Ok(self
            .store
            .list_tasks(job_id, Some(TaskStatus::Failed))
            .await?)
    }

    /// Successful tasks that produced output.
    pub async fn task_results(&self, job_id: JobId) -> Result<Vec<Task>, ControllerError> {
        let tasks = self
            .store
            .list_tasks(job_id, Some(TaskStatus::Success))
            .await?;
        Ok(tasks.into_iter().filter(|t| t.result.is_some()).collect())
    }

    pub async fn task_counts(&self, job_id: JobId) -> Result<TaskCounts, ControllerError> {
        Ok(self.store.task_counts(job_id).await?)
    }

    /// Job and task breakdown from a single consistent read.
    pub async fn job_detail(&self, job_id: JobId) -> Result<(Job, TaskCounts), ControllerError> {
        Ok(self.store.job_with_counts(job_id).await?)
    }

    /// Re-arm failed tasks in a new epoch.
    pub async fn restart_job(&self, job_id: JobId) -> Result<RestartOutcome, ControllerError> {
        let outcome = self.store.restart_failed(job_id).await?;
        info!(
            job_id = %job_id,
            epoch = outcome.job.epoch,
            rearmed = outcome.rearmed,
            "job restarted"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryDirectory;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::JobStatus;
    use dirbatch_core::{EmailAddress, OuPath};

    fn controller() -> (JobController, Arc<InMemoryDirectory>) {
        let directory = Arc::new(InMemoryDirectory::new());
        for n in 0..3 {
            directory.add_user(
                EmailAddress::parse(format!("u{n}@x.org")).unwrap(),
                OuPath::parse("/Staff").unwrap(),
                vec![],
            );
        }
        let controller = JobController::new(InMemoryJobStore::arc(), directory.clone());
        (controller, directory)
    }

    fn inject(ou: &str) -> JobParameters {
        JobParameters::AttributeInjection {
            ou_paths: vec![OuPath::parse(ou).unwrap()],
            attribute: "title".into(),
            value: "Teacher".into(),
        }
    }

    #[tokio::test]
    async fn create_job_persists_tasks() {
        let (controller, _) = controller();
        let job = controller.create_job(inject("/Staff")).await.unwrap();
        assert_eq!(job.total, 3);
        assert_eq!(job.status, JobStatus::Pending);

        let counts = controller.task_counts(job.id).await.unwrap();
        assert_eq!(counts.pending, 3);
        let (detail, counts) = controller.job_detail(job.id).await.unwrap();
        assert_eq!((detail.id, counts.total), (job.id, 3));
        assert_eq!(controller.list_jobs(&JobFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_scope_is_a_validation_error() {
        let (controller, _) = controller();
        let err = controller.create_job(inject("/Nobody")).await.unwrap_err();
        assert!(matches!(err, ControllerError::Validation(_)));
        assert!(controller.list_jobs(&JobFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_directory_is_upstream() {
        let (controller, directory) = controller();
        directory.set_outage(Some(DirectoryError::Transient("connection reset".into())));
        let err = controller.create_job(inject("/Staff")).await.unwrap_err();
        assert!(matches!(err, ControllerError::Upstream(_)));
        assert!(controller.list_jobs(&JobFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn restart_of_pending_job_is_invalid_state() {
        let (controller, _) = controller();
        let job = controller.create_job(inject("/Staff")).await.unwrap();
        let err = controller.restart_job(job.id).await.unwrap_err();
        assert!(matches!(err, ControllerError::InvalidState(_)));
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let (controller, _) = controller();
        let err = controller.get_job(JobId::new()).await.unwrap_err();
        assert!(matches!(err, ControllerError::NotFound(_)));
        let err = controller.list_failed_tasks(JobId::new()).await.unwrap_err();
        assert!(matches!(err, ControllerError::NotFound(_)));
    }
}
