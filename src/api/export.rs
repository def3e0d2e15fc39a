//! Bulk JSON export of every persisted run.

use crate::error::ApiError;
use crate::models::{AnalysisResult, RunSummary};
use crate::AppState;
use axum::{extract::State, response::Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

const EXPORT_FILE: &str = "market_data_export.json";

#[derive(Debug, Serialize)]
pub struct ExportPayload {
    pub generated_at: DateTime<Utc>,
    pub run_count: usize,
    pub runs: Vec<AnalysisResult>,
}

#[derive(Debug, Serialize)]
pub struct ExportFileResponse {
    pub path: String,
    pub bytes: u64,
    pub run_count: usize,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ExportSummaryResponse {
    pub generated_at: DateTime<Utc>,
    pub run_count: usize,
    pub runs: Vec<RunSummary>,
}

fn build_payload(state: &AppState) -> Result<ExportPayload, ApiError> {
    let runs = state.store.export_all()?;
    Ok(ExportPayload {
        generated_at: Utc::now(),
        run_count: runs.len(),
        runs,
    })
}

pub async fn get_export(State(state): State<AppState>) -> Result<Json<ExportPayload>, ApiError> {
    Ok(Json(build_payload(&state)?))
}

/// Write the export to the cache directory (overwriting the previous file)
/// and report where it landed. The write goes through a temp file so a
/// concurrent reader never sees a half-written export.
pub async fn get_export_file(
    State(state): State<AppState>,
) -> Result<Json<ExportFileResponse>, ApiError> {
    let payload = build_payload(&state)?;
    let body = serde_json::to_vec_pretty(&payload)?;

    let dir = Path::new(&state.config.cache_dir);
    std::fs::create_dir_all(dir)
        .map_err(|e| ApiError::Storage(format!("create {}: {e}", dir.display())))?;
    let path = dir.join(EXPORT_FILE);
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &body)
        .map_err(|e| ApiError::Storage(format!("write {}: {e}", tmp.display())))?;
    std::fs::rename(&tmp, &path)
        .map_err(|e| ApiError::Storage(format!("rename {}: {e}", path.display())))?;

    Ok(Json(ExportFileResponse {
        path: path.to_string_lossy().into_owned(),
        bytes: body.len() as u64,
        run_count: payload.run_count,
        generated_at: payload.generated_at,
    }))
}

/// Summaries only; cheap enough to poll.
pub async fn get_export_summary(
    State(state): State<AppState>,
) -> Result<Json<ExportSummaryResponse>, ApiError> {
    let mut runs = Vec::new();
    let mut page = 1;
    loop {
        let batch = state.store.list(page, 500)?;
        let done = batch.len() < 500;
        runs.extend(batch);
        if done {
            break;
        }
        page += 1;
    }

    Ok(Json(ExportSummaryResponse {
        generated_at: Utc::now(),
        run_count: runs.len(),
        runs,
    }))
}
