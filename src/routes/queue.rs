use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::{ImageJob, NewJob};
use crate::models::queue::{
    CreateJobRequest, EnqueueRequest, EnqueueResponse, ErrorResponse, ProcessRequest,
    ProcessResponse, TaskResponse,
};
use crate::services::job_store::StoreError;
use crate::services::status::StatusReport;
use crate::services::worker::{BatchRequest, WorkerError};

/// Errors surfaced by the queue API, rendered as `{"success": false, "error": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    Validation(#[from] garde::Report),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(e) | ApiError::Worker(WorkerError::Store(e)) => match e {
                StoreError::Conflict { .. }
                | StoreError::LeaseLost { .. }
                | StoreError::AlreadyQueued(_) => StatusCode::CONFLICT,
                StoreError::NotFound(_) | StoreError::TargetNotFound(_) => StatusCode::NOT_FOUND,
                StoreError::Database(_) | StoreError::Decode(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Worker(WorkerError::UnknownProvider(_)) => StatusCode::BAD_REQUEST,
            ApiError::Worker(WorkerError::NoProvider) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// POST /api/v1/image-queue/enqueue: scan the catalog and enqueue missing images.
pub async fn enqueue_missing(
    State(state): State<AppState>,
    body: Option<Json<EnqueueRequest>>,
) -> Result<Json<EnqueueResponse>, ApiError> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    request.validate()?;

    let kinds = request.kinds.unwrap_or_default();
    let results = state.producer.run(&kinds, request.batch_size).await?;

    let registry = state.worker.registry();
    registry.refresh_or_keep().await;
    let provider = match request.provider.as_deref() {
        Some(name) => registry.active(name),
        None => registry.select(),
    };
    let estimated_cost = provider.map(|(config, _)| f64::from(results.enqueued) * config.cost_per_image);

    Ok(Json(EnqueueResponse {
        success: true,
        results,
        estimated_cost,
    }))
}

/// POST /api/v1/image-queue/jobs: enqueue one explicit job.
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<TaskResponse>), ApiError> {
    request.validate()?;

    let job = NewJob {
        target: request.target,
        prompt: request.prompt,
        style_preset: request.style_preset,
        negative_prompt: request.negative_prompt,
        priority: request.priority.unwrap_or(0),
    };
    let task_id = state.store.enqueue(job).await?;
    tracing::info!(job_id = %task_id, "Enqueued explicit image job");

    Ok((
        StatusCode::CREATED,
        Json(TaskResponse {
            success: true,
            task_id,
        }),
    ))
}

/// GET /api/v1/image-queue/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ImageJob>, ApiError> {
    let job = state
        .store
        .get(job_id)
        .await?
        .ok_or(StoreError::NotFound(job_id))?;
    Ok(Json(job))
}

/// POST /api/v1/image-queue/jobs/{id}/retry: re-enqueue a failed job.
pub async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<(StatusCode, Json<TaskResponse>), ApiError> {
    let task_id = state.store.retry(job_id).await?;
    tracing::info!(job_id = %task_id, retry_of = %job_id, "Retrying failed image job");

    Ok((
        StatusCode::CREATED,
        Json(TaskResponse {
            success: true,
            task_id,
        }),
    ))
}

/// POST /api/v1/image-queue/process: run one worker batch.
pub async fn process_batch(
    State(state): State<AppState>,
    Json(request): Json<ProcessRequest>,
) -> Result<Json<ProcessResponse>, ApiError> {
    request.validate()?;

    let results = state
        .worker
        .run_batch(BatchRequest {
            batch_size: request.batch_size,
            provider: request.provider,
            test: request.test,
        })
        .await?;
    Ok(Json(ProcessResponse { results }))
}

/// GET /api/v1/image-queue/status
pub async fn queue_status(State(state): State<AppState>) -> Result<Json<StatusReport>, ApiError> {
    Ok(Json(state.status.report().await?))
}
