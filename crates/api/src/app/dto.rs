use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dirbatch_core::{EmailAddress, EntityKey, JobId, OuPath, TaskId};
use dirbatch_infra::jobs::{
    Job, JobFilter, JobKind, JobParameters, JobRun, JobStatus, Task, TaskAction, TaskCounts,
    TaskError,
};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

/// Flat job creation body; which fields apply depends on `kind`.
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub kind: String,
    #[serde(default)]
    pub ou_paths: Vec<String>,
    pub group_email: Option<String>,
    pub attribute: Option<String>,
    pub value: Option<String>,
    pub prune: Option<bool>,
    pub domain: Option<String>,
}

impl CreateJobRequest {
    pub fn into_parameters(self) -> Result<JobParameters, axum::response::Response> {
        let kind: JobKind = self.kind.parse().map_err(|_| {
            errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_kind",
                "kind must be one of: attribute_injection, group_sync, alias_extraction",
            )
        })?;
        let ou_paths = self
            .ou_paths
            .iter()
            .map(OuPath::parse)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| bad_request(e.to_string()))?;

        let parameters = match kind {
            JobKind::AttributeInjection => JobParameters::AttributeInjection {
                ou_paths,
                attribute: self
                    .attribute
                    .ok_or_else(|| bad_request("attribute is required"))?,
                value: self.value.ok_or_else(|| bad_request("value is required"))?,
            },
            JobKind::GroupSync => {
                let raw = self
                    .group_email
                    .ok_or_else(|| bad_request("group_email is required"))?;
                JobParameters::GroupSync {
                    ou_paths,
                    group_email: EmailAddress::parse(&raw)
                        .map_err(|e| bad_request(e.to_string()))?,
                    prune: self.prune.unwrap_or(false),
                }
            }
            JobKind::AliasExtraction => JobParameters::AliasExtraction {
                domain: self.domain,
                ou_paths,
            },
        };
        Ok(parameters)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub kind: Option<String>,
    pub status: Option<String>,
    pub limit: Option<usize>,
}

impl ListJobsQuery {
    pub fn into_filter(self) -> Result<JobFilter, axum::response::Response> {
        let mut filter = JobFilter::default();
        if let Some(kind) = self.kind {
            filter.kind = Some(
                kind.parse()
                    .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_kind", "unknown job kind"))?,
            );
        }
        if let Some(status) = self.status {
            filter.status = Some(status.parse().map_err(|_| {
                errors::json_error(StatusCode::BAD_REQUEST, "invalid_status", "unknown job status")
            })?);
        }
        if let Some(limit) = self.limit {
            if limit == 0 {
                return Err(bad_request("limit must be positive"));
            }
            filter.limit = limit;
        }
        Ok(filter)
    }
}

fn bad_request(message: impl Into<String>) -> axum::response::Response {
    errors::json_error(StatusCode::BAD_REQUEST, "validation_error", message)
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub total: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub progress_percentage: f64,
    pub epoch: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<JobParameters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_counts: Option<TaskCounts>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<JobRun>,
}

impl JobSummary {
    /// Compact form used in listings.
    pub fn from_job(job: Job) -> Self {
        Self {
            job_id: job.id,
            kind: job.kind,
            status: job.status,
            total: job.total,
            processed: job.processed,
            succeeded: job.succeeded,
            failed: job.failed,
            progress_percentage: job.progress_percentage(),
            epoch: job.epoch,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error_message: job.error_message,
            parameters: None,
            task_counts: None,
            history: Vec::new(),
        }
    }

    /// Full form with parameters, task breakdown and earlier epochs.
    pub fn detailed(job: Job, counts: TaskCounts) -> Self {
        let parameters = job.parameters.clone();
        let history = job.history.clone();
        Self {
            parameters: Some(parameters),
            task_counts: Some(counts),
            history,
            ..Self::from_job(job)
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FailedTaskView {
    pub task_id: TaskId,
    pub entity_key: EntityKey,
    pub action: TaskAction,
    pub attempt_count: u32,
    pub last_error: Option<TaskError>,
    pub updated_at: DateTime<Utc>,
}

impl From<Task> for FailedTaskView {
    fn from(task: Task) -> Self {
        Self {
            task_id: task.id,
            entity_key: task.entity_key,
            action: task.action,
            attempt_count: task.attempt_count,
            last_error: task.last_error,
            updated_at: task.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TaskResultView {
    pub task_id: TaskId,
    pub entity_key: EntityKey,
    pub result: serde_json::Value,
}

impl From<Task> for TaskResultView {
    fn from(task: Task) -> Self {
        Self {
            task_id: task.id,
            entity_key: task.entity_key,
            result: task.result.unwrap_or(serde_json::Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(kind: &str) -> CreateJobRequest {
        CreateJobRequest {
            kind: kind.to_string(),
            ou_paths: vec!["/Staff".into()],
            group_email: None,
            attribute: None,
            value: None,
            prune: None,
            domain: None,
        }
    }

    #[test]
    fn group_sync_requires_group_email() {
        assert!(request("group_sync").into_parameters().is_err());

        let mut req = request("group_sync");
        req.group_email = Some("Staff@School.org".into());
        let params = req.into_parameters().unwrap();
        assert_eq!(params.kind(), JobKind::GroupSync);
    }

    #[test]
    fn ou_paths_must_be_absolute() {
        let mut req = request("attribute_injection");
        req.ou_paths = vec!["Staff".into()];
        req.attribute = Some("title".into());
        req.value = Some("Teacher".into());
        assert!(req.into_parameters().is_err());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(request("delete_everyone").into_parameters().is_err());
    }

    #[test]
    fn list_query_parses_filters() {
        let filter = ListJobsQuery {
            kind: Some("alias_extraction".into()),
            status: Some("completed".into()),
            limit: Some(5),
        }
        .into_filter()
        .unwrap();
        assert_eq!(filter.kind, Some(JobKind::AliasExtraction));
        assert_eq!(filter.status, Some(JobStatus::Completed));
        assert_eq!(filter.limit, 5);
        assert!(ListJobsQuery {
            status: Some("sleeping".into()),
            ..Default::default()
        }
        .into_filter()
        .is_err());
    }
}
