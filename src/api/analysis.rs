//! Analysis endpoints: fetch/trigger runs, status, rescore, and the live
//! progress stream.

use crate::analysis::orchestrator::{RunParams, StatusSnapshot};
use crate::analysis::scoring::{self, StrategyProfile};
use crate::error::ApiError;
use crate::models::{AnalysisResult, ExecutionMode, ProgressUpdate, RunStatus, Strategy};
use crate::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// Heartbeat cadence on the progress stream while a run is in flight.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Default, Deserialize)]
pub struct AnalysisQuery {
    pub strategy: Option<Strategy>,
    pub execution_mode: Option<ExecutionMode>,
    #[serde(default)]
    pub force_refresh: bool,
    #[serde(default)]
    pub test_mode: bool,
}

fn run_params(state: &AppState, q: &AnalysisQuery) -> RunParams {
    RunParams {
        strategy: q.strategy.unwrap_or(state.config.default_strategy),
        execution_mode: q.execution_mode.unwrap_or(ExecutionMode::Instant),
        test_mode: q.test_mode,
    }
}

/// Serve the latest run, rescoring it when the requested strategy or mode
/// differ; run synchronously when forced or when no run exists yet.
pub async fn get_analysis(
    Query(q): Query<AnalysisQuery>,
    State(state): State<AppState>,
) -> Result<Json<AnalysisResult>, ApiError> {
    let params = run_params(&state, &q);

    if !q.force_refresh {
        if let Some(latest) = state.store.latest_run_id()? {
            let full = state.store.get_full(latest)?;
            if full.strategy == params.strategy && full.execution_mode == params.execution_mode {
                return Ok(Json(full));
            }
            debug!(run_id = latest, "serving rescored view of latest run");
            return Ok(Json(scoring::rescore(
                &full,
                params.strategy,
                params.execution_mode,
            )));
        }
    }

    let result = state.orchestrator.run_blocking(params).await?;
    Ok(Json(result))
}

#[derive(Debug, Default, Deserialize)]
pub struct TriggerRequest {
    pub strategy: Option<Strategy>,
    pub execution_mode: Option<ExecutionMode>,
    #[serde(default)]
    pub test_mode: bool,
}

/// Kick off a background run. 202 with the reserved run id, or 409 carrying
/// the in-flight id.
pub async fn post_analysis(
    State(state): State<AppState>,
    body: Option<Json<TriggerRequest>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let params = RunParams {
        strategy: req.strategy.unwrap_or(state.config.default_strategy),
        execution_mode: req.execution_mode.unwrap_or(ExecutionMode::Instant),
        test_mode: req.test_mode,
    };

    let run_id = state.orchestrator.trigger(params)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "run_id": run_id, "status": "started" })),
    ))
}

pub async fn get_status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.orchestrator.status())
}

/// Server-sent progress events. Emits the current state immediately, then
/// every orchestrator update, with a heartbeat while running. One terminal
/// `completed`/`error` event ends the stream.
pub async fn get_progress(
    State(state): State<AppState>,
) -> Sse<ReceiverStream<Result<Event, Infallible>>> {
    let mut updates = state.orchestrator.subscribe();
    let orchestrator = state.orchestrator.clone();
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(32);

    tokio::spawn(async move {
        let snapshot = orchestrator.status();
        let initial = ProgressUpdate {
            status: snapshot.status,
            progress: snapshot.progress,
            message: snapshot.message,
            run_id: snapshot.run_id,
            error: None,
        };
        if send_update(&tx, &initial).await.is_err() {
            return;
        }

        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + HEARTBEAT_INTERVAL,
            HEARTBEAT_INTERVAL,
        );
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                update = updates.recv() => match update {
                    Ok(update) => {
                        let terminal = matches!(
                            update.status,
                            RunStatus::Completed | RunStatus::Error
                        );
                        if send_update(&tx, &update).await.is_err() {
                            return;
                        }
                        if terminal {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "progress subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
                _ = heartbeat.tick() => {
                    let snap = orchestrator.status();
                    if snap.status == RunStatus::Running {
                        let beat = ProgressUpdate {
                            status: RunStatus::Running,
                            progress: snap.progress,
                            message: snap.message,
                            run_id: snap.run_id,
                            error: None,
                        };
                        if send_update(&tx, &beat).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    });

    Sse::new(ReceiverStream::new(rx))
}

async fn send_update(
    tx: &mpsc::Sender<Result<Event, Infallible>>,
    update: &ProgressUpdate,
) -> Result<(), ()> {
    let event = Event::default().json_data(update).map_err(|_| ())?;
    tx.send(Ok(event)).await.map_err(|_| ())
}

#[derive(Debug, Default, Deserialize)]
pub struct RescoreRequest {
    pub strategy: Option<Strategy>,
    pub execution_mode: Option<ExecutionMode>,
}

/// Rescore the latest run under new settings. Pure replay of the captured
/// payload; no upstream calls are made.
pub async fn post_rescore(
    State(state): State<AppState>,
    body: Option<Json<RescoreRequest>>,
) -> Result<Json<AnalysisResult>, ApiError> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let latest = state
        .store
        .latest_run_id()?
        .ok_or_else(|| ApiError::NotFound("no runs recorded yet".into()))?;
    let full = state.store.get_full(latest)?;

    let strategy = req.strategy.unwrap_or(state.config.default_strategy);
    let mode = req.execution_mode.unwrap_or(full.execution_mode);
    Ok(Json(scoring::rescore(&full, strategy, mode)))
}

pub async fn get_strategies(State(state): State<AppState>) -> Json<Value> {
    let profiles: Vec<StrategyProfile> = Strategy::ALL.iter().map(|s| StrategyProfile::of(*s)).collect();
    Json(json!({
        "strategies": profiles,
        "default": state.config.default_strategy,
    }))
}
