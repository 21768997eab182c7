use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::target::{TargetKind, TargetRef};
use crate::services::producer::ProducerReport;
use crate::services::worker::BatchReport;

/// Largest batch a single worker trigger may claim.
pub const MAX_BATCH_SIZE: u32 = 50;

/// Largest number of jobs one producer run may create. Enqueueing is one
/// cheap insert per entity, so this is not bound by the claim batch.
pub const MAX_ENQUEUE_LIMIT: u32 = 500;

/// Body of the producer trigger. The whole body is optional.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    /// Upper bound on jobs created by this run.
    #[garde(range(min = 1, max = MAX_ENQUEUE_LIMIT))]
    pub batch_size: Option<u32>,

    /// Provider used for the cost estimate in the response.
    #[garde(length(min = 1, max = 100))]
    pub provider: Option<String>,

    #[garde(skip)]
    pub kinds: Option<Vec<TargetKind>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub success: bool,
    pub results: ProducerReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
}

/// Request to enqueue a single explicit job.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    #[garde(length(min = 1, max = 2000))]
    pub prompt: String,

    #[garde(length(min = 1, max = 100))]
    pub style_preset: Option<String>,

    #[garde(length(max = 2000))]
    pub negative_prompt: Option<String>,

    #[garde(range(min = -100, max = 100))]
    pub priority: Option<i32>,

    #[garde(skip)]
    pub target: Option<TargetRef>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskResponse {
    pub success: bool,
    pub task_id: Uuid,
}

/// Body of the worker trigger.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    #[garde(range(max = MAX_BATCH_SIZE))]
    pub batch_size: u32,

    #[garde(length(min = 1, max = 100))]
    pub provider: Option<String>,

    #[serde(default)]
    #[garde(skip)]
    pub test: bool,
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub results: BatchReport,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}
