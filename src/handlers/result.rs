//! Job result handler
//!
//! Degrades gracefully: the full result document once the job is done, the
//! verdict document with the live partial mapping injected while the mapping
//! stage runs, and structured error payloads otherwise. Unreadable artifacts
//! are reported in the body, never as a transport failure.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::AppState;

pub async fn result(State(state): State<AppState>, Path(job_id): Path<Uuid>) -> Json<Value> {
    if state.store.get(&job_id).is_none() {
        return Json(json!({ "status": "not_found" }));
    }

    match state.artifacts.load_result_document(&job_id.to_string()) {
        Ok(Some(document)) => Json(document),
        Ok(None) => Json(json!({
            "status": "error",
            "message": "No result file found"
        })),
        Err(e) => Json(json!({
            "status": "error",
            "message": e.to_string()
        })),
    }
}
