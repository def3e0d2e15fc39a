//! Run history endpoints backed by the `run_sets` projection.

use crate::error::ApiError;
use crate::models::{AnalysisResult, RunDetail, RunSummary};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub runs: Vec<RunSummary>,
    pub count: usize,
    pub page: u32,
    pub page_size: u32,
    pub timestamp: String,
}

pub async fn get_history(
    Query(q): Query<HistoryQuery>,
    State(state): State<AppState>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let page = q.page.unwrap_or(1).max(1);
    let page_size = q.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    let runs = state.store.list(page, page_size)?;

    Ok(Json(HistoryResponse {
        count: runs.len(),
        runs,
        page,
        page_size,
        timestamp: Utc::now().to_rfc3339(),
    }))
}

pub async fn get_history_detail(
    Path(run_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<RunDetail>, ApiError> {
    Ok(Json(state.store.get(run_id)?))
}

/// The full scored payload, decoded from the blob.
pub async fn get_history_analysis(
    Path(run_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<AnalysisResult>, ApiError> {
    Ok(Json(state.store.get_full(run_id)?))
}
