//! Job status handler

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::logic::jobs::Job;
use crate::AppState;

/// Either the job's latest record or the not-found sentinel; the query
/// itself always succeeds.
#[derive(Serialize)]
#[serde(untagged)]
pub enum StatusResponse {
    Known(Job),
    NotFound { status: &'static str },
}

pub async fn status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Json<StatusResponse> {
    match state.store.get(&job_id) {
        Some(job) => Json(StatusResponse::Known(job)),
        None => Json(StatusResponse::NotFound {
            status: "not_found",
        }),
    }
}
