use axum::http::StatusCode;
use serde::Deserialize;

use gradeflow_core::JobId;
use gradeflow_infra::jobs::{Job, JobStatus, QueueEstimate};
use gradeflow_infra::results::FeedbackRecord;

use crate::app::errors;

/// Upper bound on `?limit=` for list endpoints.
pub const MAX_LIST_LIMIT: usize = 200;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub subject_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    Retry,
}

#[derive(Debug, Deserialize)]
pub struct UpdateJobRequest {
    pub action: JobAction,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub subject_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunProcessorRequest {
    pub job_id: Option<JobId>,
}

// -------------------------
// Response mapping
// -------------------------

/// Requester-facing projection: no attempts, no error detail.
pub fn job_summary_to_json(job: &Job, estimate: Option<QueueEstimate>) -> serde_json::Value {
    serde_json::json!({
        "id": job.id.to_string(),
        "subject_id": job.subject_id.as_str(),
        "status": job.status.as_str(),
        "queue_position": estimate.map(|e| e.position),
        "estimated_wait_secs": estimate.map(|e| e.estimated_wait_secs),
        "created_at": job.created_at,
        "completed_at": job.completed_at,
    })
}

pub fn feedback_to_json(record: &FeedbackRecord, include_metadata: bool) -> serde_json::Value {
    let mut value = serde_json::json!({
        "job_id": record.job_id.to_string(),
        "subject_id": record.subject_id.as_str(),
        "version": record.version,
        "body": record.body,
        "created_at": record.created_at,
    });
    if include_metadata {
        value["id"] = serde_json::json!(record.id.to_string());
        value["metadata"] = record.metadata.clone();
    }
    value
}

// -------------------------
// Parsing helpers
// -------------------------

pub fn parse_job_id(raw: &str) -> Result<JobId, axum::response::Response> {
    raw.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"))
}

pub fn parse_status(raw: Option<&str>) -> Result<Option<JobStatus>, axum::response::Response> {
    raw.filter(|s| !s.is_empty())
        .map(|s| s.parse::<JobStatus>())
        .transpose()
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()))
}

pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(50).clamp(1, MAX_LIST_LIMIT)
}
