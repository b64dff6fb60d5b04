//! Analysis job endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::{Stream, StreamExt};

use crate::analysis::AnalysisOptions;
use crate::document;
use crate::error::{Error, Result};
use crate::processing::{JobId, JobState, JobStats, JobView};
use crate::server::state::AppState;

/// Request to start an analysis
#[derive(Debug, Deserialize)]
pub struct StartAnalysisRequest {
    pub file_id: String,
    #[serde(default)]
    pub options: AnalysisOptions,
}

/// Response from starting an analysis
#[derive(Debug, Serialize)]
pub struct StartAnalysisResponse {
    pub job_id: JobId,
    pub status: JobState,
    pub message: String,
}

/// Job listing with counts
#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobView>,
    pub stats: JobStats,
}

/// POST /api/analysis - Queue an uploaded file for analysis
pub async fn start_analysis(
    State(state): State<AppState>,
    Json(request): Json<StartAnalysisRequest>,
) -> Result<Json<StartAnalysisResponse>> {
    let file_id = document::sanitize_filename(&request.file_id)
        .ok_or_else(|| Error::validation("file_id is required"))?;

    let job_id = match state
        .service()
        .submit(state.upload_path(&file_id), request.options)
        .await
    {
        Ok(job_id) => job_id,
        Err(Error::NotFound(_)) => return Err(Error::not_found(format!("File '{}'", file_id))),
        Err(e) => return Err(e),
    };

    tracing::info!(%job_id, %file_id, "Analysis job created");

    Ok(Json(StartAnalysisResponse {
        job_id,
        status: JobState::Pending,
        message: "Analysis job created successfully".to_string(),
    }))
}

/// GET /api/analysis - List known jobs
pub async fn list_jobs(State(state): State<AppState>) -> Json<JobListResponse> {
    Json(JobListResponse {
        jobs: state.service().list_jobs(),
        stats: state.service().stats(),
    })
}

/// GET /api/analysis/:job_id - Job status and, once complete, its result
pub async fn get_analysis(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> Result<Json<JobView>> {
    Ok(Json(state.service().status(job_id)?))
}

/// DELETE /api/analysis/:job_id - Cancel a pending or running job
pub async fn cancel_analysis(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> Response {
    if state.service().cancel(job_id) {
        Json(json!({ "message": "Job cancelled successfully" })).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": {
                    "type": "not_found",
                    "message": "Job not found or cannot be cancelled",
                }
            })),
        )
            .into_response()
    }
}

/// GET /api/analysis/:job_id/events - Server-sent job events.
///
/// The stream ends after the job's `complete` or `error` event.
pub async fn job_events(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>>> {
    let events = state.service().subscribe(job_id)?;
    tracing::debug!(%job_id, "Event stream opened");

    let stream = events
        .into_stream()
        .map(|event| Event::default().event(event.name()).json_data(&event));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
