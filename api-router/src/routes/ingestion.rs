use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use common::storage::types::ingestion_job::IngestionJob;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerIngestionRequest {
    pub document_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIngestionJobRequest {
    pub document_id: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionJobResponse {
    pub id: String,
    pub document_id: String,
    pub status: &'static str,
    pub progress: Option<u8>,
    pub error_message: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<IngestionJob> for IngestionJobResponse {
    fn from(job: IngestionJob) -> Self {
        Self {
            id: job.id,
            document_id: job.document_id,
            status: job.status.as_str(),
            progress: job.progress,
            error_message: job.error_message,
            metadata: job.metadata,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::ValidationError(rejection.body_text()))
}

fn to_response(jobs: Vec<IngestionJob>) -> Json<Vec<IngestionJobResponse>> {
    Json(jobs.into_iter().map(IngestionJobResponse::from).collect())
}

pub async fn trigger_ingestion(
    State(state): State<ApiState>,
    payload: Result<Json<TriggerIngestionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request = body(payload)?;
    info!(document_id = %request.document_id, "Received ingestion trigger");

    let job = state
        .orchestrator
        .trigger_ingestion(&request.document_id)
        .await?;

    Ok((StatusCode::CREATED, Json(IngestionJobResponse::from(job))))
}

pub async fn create_job(
    State(state): State<ApiState>,
    payload: Result<Json<CreateIngestionJobRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request = body(payload)?;
    let job = state
        .orchestrator
        .create(&request.document_id, request.metadata)
        .await?;

    Ok((StatusCode::CREATED, Json(IngestionJobResponse::from(job))))
}

pub async fn list_jobs(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let jobs = state.orchestrator.find_all().await?;
    Ok(to_response(jobs))
}

pub async fn get_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.orchestrator.find_one(&id).await?;
    Ok(Json(IngestionJobResponse::from(job)))
}

pub async fn get_jobs_by_document(
    State(state): State<ApiState>,
    Path(document_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let jobs = state.orchestrator.get_jobs_by_document(&document_id).await?;
    Ok(to_response(jobs))
}

pub async fn cancel_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.orchestrator.cancel_job(&id).await?;
    Ok(Json(IngestionJobResponse::from(job)))
}
