//! End-to-end analysis runs: fetch, score, persist, report progress.
//!
//! At most one run executes at a time. The orchestrator is the sole writer
//! of runs; everything it touches is injected so tests can drive it with a
//! fake upstream.

use crate::analysis::{liquidity, pricing, profit, scoring};
use crate::error::ApiError;
use crate::market::catalog::CatalogCache;
use crate::market::client::MarketDataSource;
use crate::models::{
    AnalysisResult, ExecutionMode, ProgressUpdate, RunStatus, SetDatum, SetInfo, Strategy,
};
use crate::storage::RunStore;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

const TEST_MODE_SET_LIMIT: usize = 10;
const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// Per-run knobs taken from the request (or config defaults).
#[derive(Debug, Clone, Copy)]
pub struct RunParams {
    pub strategy: Strategy,
    pub execution_mode: ExecutionMode,
    pub test_mode: bool,
}

/// Snapshot of the orchestrator for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub status: RunStatus,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub run_id: Option<i64>,
    pub last_run_id: Option<i64>,
    pub last_error: Option<String>,
}

struct RunState {
    status: RunStatus,
    progress: u8,
    message: String,
    current_run_id: Option<i64>,
    last_run_id: Option<i64>,
    last_error: Option<String>,
}

pub struct AnalysisOrchestrator {
    source: Arc<dyn MarketDataSource>,
    catalog: Arc<CatalogCache>,
    store: Arc<RunStore>,
    progress_tx: broadcast::Sender<ProgressUpdate>,
    state: Mutex<RunState>,
    workers: usize,
    run_timeout: Duration,
}

impl AnalysisOrchestrator {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        catalog: Arc<CatalogCache>,
        store: Arc<RunStore>,
        workers: usize,
        run_timeout: Duration,
    ) -> Arc<Self> {
        let (progress_tx, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Arc::new(Self {
            source,
            catalog,
            store,
            progress_tx,
            state: Mutex::new(RunState {
                status: RunStatus::Idle,
                progress: 0,
                message: String::new(),
                current_run_id: None,
                last_run_id: None,
                last_error: None,
            }),
            workers: workers.max(1),
            run_timeout,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.progress_tx.subscribe()
    }

    pub fn status(&self) -> StatusSnapshot {
        let state = self.state.lock();
        StatusSnapshot {
            status: state.status,
            progress: (state.status == RunStatus::Running).then_some(state.progress),
            message: (!state.message.is_empty()).then(|| state.message.clone()),
            run_id: state.current_run_id,
            last_run_id: state.last_run_id,
            last_error: state.last_error.clone(),
        }
    }

    /// Claim the single running slot and reserve the run id. The second
    /// caller gets `Conflict` with the in-flight id.
    fn begin_run(&self) -> Result<i64, ApiError> {
        let mut state = self.state.lock();
        if state.status == RunStatus::Running {
            return Err(ApiError::Conflict {
                run_id: state.current_run_id.unwrap_or(0),
            });
        }
        let run_id = self.store.next_run_id()?;
        state.status = RunStatus::Running;
        state.progress = 0;
        state.message = "starting".into();
        state.current_run_id = Some(run_id);
        state.last_error = None;
        Ok(run_id)
    }

    /// Start a background run. Returns the reserved run id immediately.
    pub fn trigger(self: &Arc<Self>, params: RunParams) -> Result<i64, ApiError> {
        let run_id = self.begin_run()?;
        let this = self.clone();
        tokio::spawn(async move {
            let _ = this.execute(run_id, params).await;
        });
        Ok(run_id)
    }

    /// Run to completion on the caller's task (synchronous GET path).
    pub async fn run_blocking(
        self: &Arc<Self>,
        params: RunParams,
    ) -> Result<AnalysisResult, ApiError> {
        let run_id = self.begin_run()?;
        self.clone().execute(run_id, params).await
    }

    /// Trigger a run every `interval_secs`, skipping ticks while one is
    /// already in flight.
    pub fn spawn_poll_loop(self: &Arc<Self>, interval_secs: u64, params: RunParams) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match this.trigger(params) {
                    Ok(run_id) => info!(run_id, "scheduled analysis started"),
                    Err(ApiError::Conflict { run_id }) => {
                        debug!(run_id, "analysis already running, skipping tick");
                    }
                    Err(e) => warn!(error = %e, "scheduled analysis failed to start"),
                }
            }
        });
    }

    async fn execute(
        self: Arc<Self>,
        run_id: i64,
        params: RunParams,
    ) -> Result<AnalysisResult, ApiError> {
        let started = std::time::Instant::now();
        let outcome =
            tokio::time::timeout(self.run_timeout, self.clone().run_inner(run_id, params)).await;

        match outcome {
            Ok(Ok(result)) => {
                info!(
                    run_id,
                    sets = result.total_sets,
                    profitable = result.profitable_sets,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "analysis run completed"
                );
                self.finish_ok(run_id);
                Ok(result)
            }
            Ok(Err(e)) => {
                warn!(run_id, error = %e, "analysis run failed");
                self.finish_err(run_id, &e);
                Err(e)
            }
            Err(_) => {
                let e = ApiError::Timeout(format!(
                    "analysis exceeded {}s",
                    self.run_timeout.as_secs()
                ));
                warn!(run_id, error = %e, "analysis run timed out");
                self.finish_err(run_id, &e);
                Err(e)
            }
        }
    }

    async fn run_inner(
        self: Arc<Self>,
        run_id: i64,
        params: RunParams,
    ) -> Result<AnalysisResult, ApiError> {
        self.set_progress(run_id, 0, "starting");

        // Workers operate on this snapshot; a concurrent catalog change
        // cannot alter an in-flight run.
        let mut sets = self.catalog.refresh_if_stale(self.source.as_ref()).await?;
        self.set_progress(run_id, 5, "catalog refreshed");

        if params.test_mode {
            sets.truncate(TEST_MODE_SET_LIMIT);
        }
        let total = sets.len();

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let completed = Arc::new(AtomicUsize::new(0));
        let mut workers: JoinSet<(usize, SetDatum)> = JoinSet::new();

        for (idx, set) in sets.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let completed = completed.clone();
            let source = self.source.clone();
            let this = self.clone();
            let mode = params.execution_mode;

            workers.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore never closed");
                let datum = analyze_set(source.as_ref(), &set, mode).await;

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                let pct = 5 + (done * 90 / total.max(1)) as u8;
                this.set_progress(run_id, pct, &format!("analyzing sets ({done}/{total})"));
                (idx, datum)
            });
        }

        // Collect in catalog order so scoring input is deterministic.
        let mut slots: Vec<Option<SetDatum>> = (0..total).map(|_| None).collect();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((idx, datum)) => slots[idx] = Some(datum),
                Err(e) => {
                    return Err(ApiError::Cancelled(format!("set worker died: {e}")));
                }
            }
        }
        let mut data: Vec<SetDatum> = slots.into_iter().flatten().collect();

        self.set_progress(run_id, 96, "scoring");
        let profile = scoring::StrategyProfile::of(params.strategy);
        let profitable = scoring::score_all(&mut data, &profile);

        let mut result = AnalysisResult {
            run_id: Some(run_id),
            timestamp: Utc::now(),
            strategy: params.strategy,
            execution_mode: params.execution_mode,
            total_sets: total as u32,
            profitable_sets: profitable,
            sets: data,
        };

        self.set_progress(run_id, 98, "persisting run");
        let stored_id = self.store.append(&result)?;
        result.run_id = Some(stored_id);
        Ok(result)
    }

    /// Raise the progress percentage (never lowers it) and publish. The
    /// state lock is held across the (non-blocking) send so subscribers see
    /// percentages in non-decreasing order.
    fn set_progress(&self, run_id: i64, pct: u8, message: &str) {
        let mut state = self.state.lock();
        state.progress = state.progress.max(pct.min(99));
        state.message = message.to_string();
        let _ = self.progress_tx.send(ProgressUpdate {
            status: RunStatus::Running,
            progress: Some(state.progress),
            message: Some(message.to_string()),
            run_id: Some(run_id),
            error: None,
        });
    }

    fn finish_ok(&self, run_id: i64) {
        {
            let mut state = self.state.lock();
            state.status = RunStatus::Idle;
            state.progress = 0;
            state.message = String::new();
            state.current_run_id = None;
            state.last_run_id = Some(run_id);
        }
        let _ = self.progress_tx.send(ProgressUpdate {
            status: RunStatus::Completed,
            progress: Some(100),
            message: Some("completed".into()),
            run_id: Some(run_id),
            error: None,
        });
    }

    fn finish_err(&self, run_id: i64, error: &ApiError) {
        {
            let mut state = self.state.lock();
            state.status = RunStatus::Idle;
            state.progress = 0;
            state.message = String::new();
            state.current_run_id = None;
            state.last_error = Some(error.to_string());
        }
        let _ = self.progress_tx.send(ProgressUpdate {
            status: RunStatus::Error,
            progress: None,
            message: None,
            run_id: Some(run_id),
            error: Some(error.to_string()),
        });
    }
}

/// Fetch and analyze one set. Failures become a zeroed datum with a note;
/// they never abort the run.
async fn analyze_set(source: &dyn MarketDataSource, set: &SetInfo, mode: ExecutionMode) -> SetDatum {
    match fetch_and_analyze(source, set, mode).await {
        Ok(datum) => datum,
        Err(e) => {
            warn!(set = %set.slug, error = %e, "set analysis failed, recording empty datum");
            scoring::error_datum(&set.slug, &set.name, e.to_string())
        }
    }
}

async fn fetch_and_analyze(
    source: &dyn MarketDataSource,
    set: &SetInfo,
    mode: ExecutionMode,
) -> Result<SetDatum, ApiError> {
    let set_book = source.top_orders(&set.slug).await?;

    let mut quotes = Vec::with_capacity(set.parts.len());
    for part in &set.parts {
        let book = source.top_orders(&part.slug).await?;
        quotes.push(profit::PartQuote {
            slug: part.slug.clone(),
            name: part.name.clone(),
            quantity: part.quantity,
            instant_unit: pricing::resolve_part_price(&book, ExecutionMode::Instant),
            patient_unit: pricing::resolve_part_price(&book, ExecutionMode::Patient),
        });
    }

    let stats = source.statistics_48h(&set.slug).await?;
    let metrics = liquidity::analyze(&set_book, &stats);
    let breakdown = profit::compute(
        pricing::resolve_set_price(&set_book, ExecutionMode::Instant),
        pricing::resolve_set_price(&set_book, ExecutionMode::Patient),
        &quotes,
        mode,
    );

    Ok(scoring::build_datum(
        &set.slug, &set.name, breakdown, metrics, None,
    ))
}
