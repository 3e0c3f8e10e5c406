//! Job submission and audit endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use pushq_core::{JobId, JobKind, SubmitPayload};
use pushq_db::EventRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(submit_job))
        .route("/test", post(submit_test))
        .route("/{id}/events", get(list_events))
}

#[derive(Debug, Deserialize)]
struct SubmitJobRequest {
    id: Option<String>,
    source_url: String,
    repository: String,
    owner_email: String,
    #[serde(default)]
    build: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct JobAccepted {
    id: String,
    kind: JobKind,
}

fn job_id(raw: Option<String>) -> Result<JobId, ApiError> {
    match raw {
        Some(raw) => Ok(JobId::parse(raw)?),
        None => Ok(JobId::generate()),
    }
}

async fn submit_job(
    State(state): State<AppState>,
    Json(req): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    for (field, value) in [
        ("source_url", &req.source_url),
        ("repository", &req.repository),
        ("owner_email", &req.owner_email),
    ] {
        if value.trim().is_empty() {
            return Err(ApiError::BadRequest(format!("{field} must not be empty")));
        }
    }

    let id = job_id(req.id)?;
    let payload = SubmitPayload {
        source_url: req.source_url,
        repository: req.repository,
        owner_email: req.owner_email,
        build: req.build,
    };
    let handle = state.client.submit_job(id, &payload).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(JobAccepted {
            id: handle.id.to_string(),
            kind: handle.kind,
        }),
    ))
}

async fn submit_test(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    let handle = state.client.submit_test(JobId::generate()).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(JobAccepted {
            id: handle.id.to_string(),
            kind: handle.kind,
        }),
    ))
}

async fn list_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<EventRecord>>, ApiError> {
    let repo = state
        .event_repo
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("no audit store is configured".to_string()))?;
    let id = JobId::parse(id)?;

    let events = repo.list_for_job(&id).await?;
    if events.is_empty() {
        return Err(ApiError::NotFound(format!("no events for job {id}")));
    }
    Ok(Json(events))
}
