use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use dirbatch_infra::jobs::ControllerError;

pub fn controller_error_to_response(err: ControllerError) -> axum::response::Response {
    match err {
        ControllerError::Validation(msg) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
        ControllerError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found"))
        }
        ControllerError::InvalidState(msg) => json_error(StatusCode::CONFLICT, "invalid_state", msg),
        ControllerError::Upstream(e) => {
            json_error(StatusCode::BAD_GATEWAY, "upstream_error", e.to_string())
        }
        ControllerError::Store(e) => {
            tracing::error!(error = %e, "job store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn parse_job_id(raw: &str) -> Result<dirbatch_core::JobId, axum::response::Response> {
    raw.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"))
}
