//! Catalog views and per-set run history.

use crate::error::ApiError;
use crate::models::SetInfo;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct SetSummary {
    pub slug: String,
    pub name: String,
    pub part_count: usize,
}

#[derive(Debug, Serialize)]
pub struct SetsResponse {
    pub sets: Vec<SetSummary>,
    pub count: usize,
    pub catalog_refreshed_at: Option<DateTime<Utc>>,
}

pub async fn get_sets(State(state): State<AppState>) -> Json<SetsResponse> {
    let sets = state.catalog.sets().await;
    let refreshed_at = state.catalog.snapshot_meta().await.map(|(_, at, _)| at);

    Json(SetsResponse {
        count: sets.len(),
        sets: sets
            .into_iter()
            .map(|s| SetSummary {
                slug: s.slug,
                name: s.name,
                part_count: s.parts.len(),
            })
            .collect(),
        catalog_refreshed_at: refreshed_at,
    })
}

pub async fn get_set(
    Path(slug): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<SetInfo>, ApiError> {
    state
        .catalog
        .get(&slug)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("set {slug}")))
}

#[derive(Debug, Default, Deserialize)]
pub struct SetHistoryQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct SetHistoryEntry {
    pub run_id: i64,
    pub timestamp: DateTime<Utc>,
    pub profit_margin: f64,
    pub lowest_price: f64,
}

#[derive(Debug, Serialize)]
pub struct SetHistoryResponse {
    pub set_slug: String,
    pub entries: Vec<SetHistoryEntry>,
    pub count: usize,
}

/// How one set's margin moved across recorded runs, newest first.
pub async fn get_set_history(
    Path(slug): Path<String>,
    Query(q): Query<SetHistoryQuery>,
    State(state): State<AppState>,
) -> Result<Json<SetHistoryResponse>, ApiError> {
    let rows = state.store.set_history(&slug, q.limit.unwrap_or(50))?;
    if rows.is_empty() && state.catalog.get(&slug).await.is_none() {
        return Err(ApiError::NotFound(format!("set {slug}")));
    }

    let entries: Vec<SetHistoryEntry> = rows
        .into_iter()
        .map(|(summary, row)| SetHistoryEntry {
            run_id: summary.run_id,
            timestamp: summary.timestamp,
            profit_margin: row.profit_margin,
            lowest_price: row.lowest_price,
        })
        .collect();

    Ok(Json(SetHistoryResponse {
        set_slug: slug,
        count: entries.len(),
        entries,
    }))
}
