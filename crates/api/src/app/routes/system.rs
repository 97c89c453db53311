use std::sync::Arc;

use axum::{extract::Extension, response::IntoResponse, Json};

use crate::app::services::AppServices;

/// Liveness plus a snapshot of the worker pool and quota governor.
pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "scheduler": services.scheduler_stats(),
        "quota": services.quota_snapshot(),
    }))
}
