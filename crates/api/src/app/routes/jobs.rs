//! Job endpoints: progress polling, per-task state, orchestration trigger.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use copyforge_infra::TaskExecutionStore;
use copyforge_pipeline::job_progress;

use crate::app::{
    dto, errors,
    services::{AppServices, RunOutcome},
};

pub fn router() -> Router {
    Router::new()
        .route("/:job_id/progress", get(get_progress))
        .route("/:job_id/tasks", get(get_tasks))
        .route("/:job_id/orchestrate", post(start_orchestration))
        .route("/:job_id/result", get(get_result))
}

/// GET /jobs/:job_id/progress
pub async fn get_progress(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id = match errors::parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match job_progress(services.store(), job_id).await {
        Ok(progress) => Json(progress).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// GET /jobs/:job_id/tasks
///
/// Records in catalogue order; empty for a job that has never run.
pub async fn get_tasks(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id = match errors::parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let mut records = match services.store().get_records(job_id).await {
        Ok(records) => records,
        Err(e) => return errors::store_error_to_response(e),
    };

    let catalogue = services.catalogue();
    records.sort_by_key(|r| catalogue.position(&r.task_id).unwrap_or(usize::MAX));

    let tasks = records
        .into_iter()
        .map(|r| {
            let description = catalogue
                .get(&r.task_id)
                .map(|t| t.description.clone())
                .unwrap_or_default();
            dto::TaskView::from_record(r, &description)
        })
        .collect();

    Json(dto::JobTasksResponse {
        job_id: job_id.to_string(),
        running: services.is_running(job_id),
        tasks,
    })
    .into_response()
}

/// POST /jobs/:job_id/orchestrate
///
/// Starts a run in the background and returns immediately; poll progress for status.
pub async fn start_orchestration(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id = match errors::parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.start_orchestration(job_id) {
        Ok(()) => {
            tracing::info!(job_id = %job_id, "orchestration accepted");
            (
                StatusCode::ACCEPTED,
                Json(dto::OrchestrationAccepted {
                    job_id: job_id.to_string(),
                    message: format!("orchestration started for job {job_id}"),
                }),
            )
                .into_response()
        }
        Err(e) => errors::start_error_to_response(e),
    }
}

/// GET /jobs/:job_id/result
///
/// 404 until a run has ended; 500 with the error when the last run was aborted.
pub async fn get_result(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id = match errors::parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.last_outcome(job_id).await {
        Some(RunOutcome::Finished(result)) => Json(result).into_response(),
        Some(RunOutcome::Aborted { error }) => errors::json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "orchestration_failed",
            error,
        ),
        None => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no result recorded for job {job_id}"),
        ),
    }
}
