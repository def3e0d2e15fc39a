//! SetScout - marketplace set arbitrage analyzer
//!
//! Fetches live order books and 48-hour statistics for every known set,
//! scores buy-parts/sell-set spreads under a strategy profile, persists each
//! run, and serves the results over REST with a live progress stream.

mod analysis;
mod api;
mod error;
mod market;
mod middleware;
mod models;
mod storage;

use analysis::orchestrator::{AnalysisOrchestrator, RunParams};
use anyhow::{Context, Result};
use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use market::{CatalogCache, MarketClient, RequestLimiter};
use models::{Config, ExecutionMode};
use std::sync::Arc;
use std::time::Duration;
use storage::RunStore;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<RunStore>,
    pub catalog: Arc<CatalogCache>,
    pub orchestrator: Arc<AnalysisOrchestrator>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing();

    info!("🚀 SetScout analysis engine starting");
    info!(
        db = %config.database_path,
        cache = %config.cache_dir,
        upstream = %config.market_api_base,
        "configuration loaded"
    );

    // Process-wide upstream budget; every request funnels through this.
    let limiter = Arc::new(RequestLimiter::new(
        config.rate_limit_requests,
        config.rate_limit_window_secs,
    ));

    let client = Arc::new(
        MarketClient::new(&config.market_api_base, limiter, config.request_timeout_secs)
            .context("Failed to build market client")?,
    );

    let store = Arc::new(
        RunStore::new(&config.database_path).context("Failed to initialize run store")?,
    );
    let catalog = Arc::new(CatalogCache::new(&config.cache_dir));

    let orchestrator = AnalysisOrchestrator::new(
        client.clone(),
        catalog.clone(),
        store.clone(),
        config.analysis_workers,
        Duration::from_secs(config.analysis_timeout_secs),
    );

    // Optional scheduled analysis; respects the same single-flight rule as
    // manual triggers.
    if let Some(interval) = config.poll_interval_secs {
        info!(interval_secs = interval, "scheduled analysis enabled");
        orchestrator.spawn_poll_loop(
            interval,
            RunParams {
                strategy: config.default_strategy,
                execution_mode: ExecutionMode::Instant,
                test_mode: false,
            },
        );
    }

    let cors = cors_layer(&config);
    let port = config.port;

    let app_state = AppState {
        config: Arc::new(config),
        store,
        catalog,
        orchestrator,
    };

    let app = Router::new()
        .route("/health", get(api::stats::get_health))
        .route(
            "/api/analysis",
            get(api::analysis::get_analysis).post(api::analysis::post_analysis),
        )
        .route("/api/analysis/status", get(api::analysis::get_status))
        .route("/api/analysis/progress", get(api::analysis::get_progress))
        .route("/api/analysis/rescore", post(api::analysis::post_rescore))
        .route("/api/analysis/strategies", get(api::analysis::get_strategies))
        .route("/api/history", get(api::history::get_history))
        .route("/api/history/:id", get(api::history::get_history_detail))
        .route(
            "/api/history/:id/analysis",
            get(api::history::get_history_analysis),
        )
        .route("/api/sets", get(api::sets::get_sets))
        .route("/api/sets/:slug", get(api::sets::get_set))
        .route("/api/sets/:slug/history", get(api::sets::get_set_history))
        .route("/api/stats", get(api::stats::get_stats))
        .route("/api/stats/health", get(api::stats::get_health))
        .route("/api/export", get(api::export::get_export))
        .route("/api/export/file", get(api::export::get_export_file))
        .route("/api/export/summary", get(api::export::get_export_summary))
        .layer(cors)
        .layer(axum::middleware::from_fn(middleware::request_logging))
        .with_state(app_state);

    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("🎯 API server listening on {addr}");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "setscout_backend=debug,setscout=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn cors_layer(config: &Config) -> CorsLayer {
    if config.cors_origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring unparseable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}
