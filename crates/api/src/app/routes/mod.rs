use axum::{
    routing::{get, post},
    Router,
};

pub mod jobs;
pub mod system;

/// Router for the job endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/jobs", post(jobs::create_job).get(jobs::list_jobs))
        .route("/jobs/:id", get(jobs::get_job))
        .route("/jobs/:id/failed-tasks", get(jobs::list_failed_tasks))
        .route("/jobs/:id/results", get(jobs::list_results))
        .route("/jobs/:id/restart", post(jobs::restart_job))
}
