use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use copyforge_core::JobId;
use copyforge_infra::TaskStoreError;

use crate::app::services::StartError;

pub fn store_error_to_response(err: TaskStoreError) -> axum::response::Response {
    match err {
        TaskStoreError::NotFound { .. } => {
            json_error(StatusCode::NOT_FOUND, "not_found", err.to_string())
        }
        TaskStoreError::InvalidTransition(msg) => {
            json_error(StatusCode::CONFLICT, "invalid_transition", msg)
        }
        TaskStoreError::Storage(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", msg)
        }
    }
}

pub fn start_error_to_response(err: StartError) -> axum::response::Response {
    match err {
        StartError::NoWorkSource => {
            json_error(StatusCode::NOT_IMPLEMENTED, "no_work_source", err.to_string())
        }
        StartError::AlreadyRunning(_) => {
            json_error(StatusCode::CONFLICT, "already_running", err.to_string())
        }
        StartError::Poisoned => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", err.to_string())
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

pub fn parse_job_id(s: &str) -> Result<JobId, axum::response::Response> {
    s.parse::<JobId>().map_err(|_| {
        json_error(
            StatusCode::BAD_REQUEST,
            "invalid_job_id",
            format!("job id must be a UUID, got '{s}'"),
        )
    })
}
