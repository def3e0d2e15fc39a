//! Service counters and health.

use crate::error::ApiError;
use crate::models::StoreStats;
use crate::AppState;
use axum::{extract::State, response::Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub store: StoreStats,
    pub catalog_sets: usize,
    pub catalog_refreshed_at: Option<DateTime<Utc>>,
    pub orchestrator: crate::analysis::orchestrator::StatusSnapshot,
    pub timestamp: DateTime<Utc>,
}

pub async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let store = state.store.stats(&state.config.database_path)?;
    let catalog = state.catalog.snapshot_meta().await;

    Ok(Json(StatsResponse {
        store,
        catalog_sets: catalog.as_ref().map(|(_, _, n)| *n).unwrap_or(0),
        catalog_refreshed_at: catalog.map(|(_, at, _)| at),
        orchestrator: state.orchestrator.status(),
        timestamp: Utc::now(),
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// Liveness probe: proves the process is serving and the store answers.
pub async fn get_health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    state.store.latest_run_id()?;
    Ok(Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
    }))
}
