//! Submission handlers
//!
//! Both entry points (uploaded APK and already-installed package) hand the
//! job to the same orchestrator and answer immediately with the queued id.

use axum::extract::{Multipart, State};
use axum::{Form, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::logic::collab::AnalysisTarget;
use crate::logic::jobs::JobStatus;
use crate::{AppError, AppResult, AppState};

#[derive(Serialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// Analyze an uploaded APK (multipart field `apk_file`)
pub async fn analyze(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<SubmitResponse>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("apk_file") {
            continue;
        }

        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("upload failed: {}", e)))?;
        if data.is_empty() {
            return Err(AppError::BadRequest("uploaded archive is empty".to_string()));
        }

        tokio::fs::create_dir_all(&state.config.upload_dir).await?;
        let apk_path = state
            .config
            .upload_dir
            .join(format!("{}.apk", Uuid::new_v4()));
        tokio::fs::write(&apk_path, &data).await?;

        let job_id = state
            .orchestrator
            .submit(AnalysisTarget::Archive { apk_path });
        return Ok(Json(SubmitResponse {
            job_id,
            status: JobStatus::Queued,
        }));
    }

    Err(AppError::BadRequest("missing apk_file field".to_string()))
}

#[derive(Deserialize)]
pub struct AnalyzeInstalledRequest {
    pub pkg_name: String,
}

/// Analyze an app already installed on the emulator (form field `pkg_name`)
pub async fn analyze_installed(
    State(state): State<AppState>,
    Form(req): Form<AnalyzeInstalledRequest>,
) -> AppResult<Json<SubmitResponse>> {
    let package = req.pkg_name.trim().to_string();
    if package.is_empty() {
        return Err(AppError::BadRequest("pkg_name must not be empty".to_string()));
    }

    let job_id = state
        .orchestrator
        .submit(AnalysisTarget::Installed { package });
    Ok(Json(SubmitResponse {
        job_id,
        status: JobStatus::Queued,
    }))
}
