use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::app::dto::{self, FailedTaskView, JobSummary, TaskResultView};
use crate::app::errors;
use crate::app::services::AppServices;

pub async fn create_job(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::CreateJobRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_body",
                rejection.body_text(),
            );
        }
    };
    let parameters = match body.into_parameters() {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let job = match services.controller.create_job(parameters).await {
        Ok(job) => job,
        Err(e) => return errors::controller_error_to_response(e),
    };

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "job_id": job.id.to_string(),
            "total": job.total,
        })),
    )
        .into_response()
}

pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    query: Option<Query<dto::ListJobsQuery>>,
) -> axum::response::Response {
    let Some(Query(query)) = query else {
        return errors::json_error(StatusCode::BAD_REQUEST, "invalid_query", "malformed query string");
    };
    let filter = match query.into_filter() {
        Ok(f) => f,
        Err(resp) => return resp,
    };

    match services.controller.list_jobs(&filter).await {
        Ok(jobs) => Json(serde_json::json!({
            "jobs": jobs.into_iter().map(JobSummary::from_job).collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(e) => errors::controller_error_to_response(e),
    }
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match errors::parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.controller.job_detail(job_id).await {
        Ok((job, counts)) => Json(JobSummary::detailed(job, counts)).into_response(),
        Err(e) => errors::controller_error_to_response(e),
    }
}

pub async fn list_failed_tasks(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match errors::parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.controller.list_failed_tasks(job_id).await {
        Ok(tasks) => Json(serde_json::json!({
            "job_id": job_id.to_string(),
            "failed": tasks.into_iter().map(FailedTaskView::from).collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(e) => errors::controller_error_to_response(e),
    }
}

pub async fn list_results(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match errors::parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.controller.task_results(job_id).await {
        Ok(tasks) => Json(serde_json::json!({
            "job_id": job_id.to_string(),
            "results": tasks.into_iter().map(TaskResultView::from).collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(e) => errors::controller_error_to_response(e),
    }
}

pub async fn restart_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match errors::parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.controller.restart_job(job_id).await {
        Ok(outcome) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "job_id": job_id.to_string(),
                "rearmed": outcome.rearmed,
                "epoch": outcome.job.epoch,
                "status": outcome.job.status,
            })),
        )
            .into_response(),
        Err(e) => errors::controller_error_to_response(e),
    }
}
