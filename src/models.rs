//! Shared domain model and configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Strategy profile selector (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    SafeSteady,
    Balanced,
    Aggressive,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::SafeSteady => "safe_steady",
            Strategy::Balanced => "balanced",
            Strategy::Aggressive => "aggressive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "safe_steady" => Some(Strategy::SafeSteady),
            "balanced" => Some(Strategy::Balanced),
            "aggressive" => Some(Strategy::Aggressive),
            _ => None,
        }
    }

    pub const ALL: [Strategy; 3] = [
        Strategy::SafeSteady,
        Strategy::Balanced,
        Strategy::Aggressive,
    ];
}

/// Whether prices assume immediate fills or posted listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Instant,
    Patient,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Instant => "instant",
            ExecutionMode::Patient => "patient",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "instant" => Some(ExecutionMode::Instant),
            "patient" => Some(ExecutionMode::Patient),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Rising,
    Falling,
    #[default]
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// One constituent of a set, as listed by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetComponent {
    pub slug: String,
    pub name: String,
    pub quantity: u32,
}

/// A composite item and its decomposition. Immutable per catalog generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetInfo {
    pub slug: String,
    pub name: String,
    pub parts: Vec<SetComponent>,
}

/// A single outstanding offer. `online` reflects the upstream-reported
/// seller status verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEntry {
    pub price: f64,
    pub quantity: u32,
    pub online: bool,
}

/// Live order book for one item. Sell orders ascending, buy orders
/// descending by price. Never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub sell: Vec<OrderEntry>,
    pub buy: Vec<OrderEntry>,
}

/// One point of the 48-hour closed-trade statistics series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatPoint {
    pub datetime: DateTime<Utc>,
    pub volume: u32,
    pub median: f64,
    pub moving_avg: Option<f64>,
}

/// Per-part pricing inside a scored set. `unit_price`/`total` reflect the
/// run's primary execution mode; both variants are kept for replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartCost {
    pub slug: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: f64,
    pub total: f64,
    pub instant_unit_price: Option<f64>,
    pub patient_unit_price: Option<f64>,
}

/// Multiplicative factor contributions; their product (profit × volume ×
/// roi × trend × liquidity ÷ volatility) reconstructs the composite score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreFactors {
    pub profit: f64,
    pub volume: f64,
    pub roi: f64,
    pub trend: f64,
    pub liquidity: f64,
    pub volatility: f64,
}

/// Everything the engine knows about one set within one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetDatum {
    pub set_slug: String,
    pub set_name: String,

    // Primary (execution-mode-selected) figures. Zero when no price resolved.
    pub set_price: f64,
    pub part_cost: f64,
    pub profit_margin: f64,
    pub profit_percentage: f64,

    // Both execution-mode variants, kept for rescoring.
    pub instant_set_price: Option<f64>,
    pub patient_set_price: Option<f64>,
    pub instant_part_cost: Option<f64>,
    pub patient_part_cost: Option<f64>,

    pub parts: Vec<PartCost>,

    pub volume_48h: u64,
    pub bid_ask_ratio: f64,
    pub sell_competition: u32,
    pub liquidity_velocity: f64,
    pub liquidity_multiplier: f64,
    pub trend_slope: f64,
    pub trend_multiplier: f64,
    pub trend_direction: TrendDirection,
    pub volatility: f64,
    pub volatility_penalty: f64,
    pub risk_level: RiskLevel,

    pub factors: ScoreFactors,
    pub composite_score: f64,
    pub profitable: bool,

    /// Per-set fetch failure, recorded instead of aborting the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Full scored output of one run. This is what `payload_blob` serializes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub run_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub strategy: Strategy,
    pub execution_mode: ExecutionMode,
    pub total_sets: u32,
    pub profitable_sets: u32,
    pub sets: Vec<SetDatum>,
}

/// Compact run header for the history list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: i64,
    pub timestamp: DateTime<Utc>,
    pub strategy: Strategy,
    pub execution_mode: ExecutionMode,
    pub total_sets: u32,
    pub profitable_sets: u32,
}

/// One `run_sets` projection row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSetRow {
    pub set_slug: String,
    pub set_name: String,
    pub profit_margin: f64,
    pub lowest_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDetail {
    #[serde(flatten)]
    pub summary: RunSummary,
    pub sets: Vec<RunSetRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub run_count: u64,
    pub run_set_count: u64,
    pub db_bytes: u64,
    pub first_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Orchestrator lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Error,
}

/// One event on the progress stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub status: RunStatus,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub run_id: Option<i64>,
    pub error: Option<String>,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub cache_dir: String,
    pub port: u16,
    pub market_api_base: String,
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: f64,
    pub request_timeout_secs: u64,
    pub analysis_timeout_secs: u64,
    pub analysis_workers: usize,
    pub poll_interval_secs: Option<u64>,
    pub cors_origins: Vec<String>,
    pub default_strategy: Strategy,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let cache_dir = std::env::var("CACHE_DIR").unwrap_or_else(|_| "cache".to_string());

        let database_path = std::env::var("DATABASE_PATH")
            .unwrap_or_else(|_| format!("{}/market_runs.sqlite", cache_dir));

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let market_api_base = std::env::var("MARKET_API_BASE")
            .unwrap_or_else(|_| "https://api.warframe.market/v1".to_string());

        let rate_limit_requests = std::env::var("RATE_LIMIT_REQUESTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(3);

        let rate_limit_window_secs = std::env::var("RATE_LIMIT_WINDOW")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|&v| v > 0.0)
            .unwrap_or(1.0);

        let request_timeout_secs = std::env::var("REQUEST_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(10);

        let analysis_timeout_secs = std::env::var("ANALYSIS_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(600);

        let analysis_workers = std::env::var("ANALYSIS_WORKERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(8);

        let poll_interval_secs = std::env::var("ANALYSIS_POLL_INTERVAL_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&v| v > 0);

        let cors_origins = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let default_strategy = std::env::var("DEFAULT_STRATEGY")
            .ok()
            .and_then(|v| Strategy::parse(&v))
            .unwrap_or(Strategy::Balanced);

        Ok(Self {
            database_path,
            cache_dir,
            port,
            market_api_base,
            rate_limit_requests,
            rate_limit_window_secs,
            request_timeout_secs,
            analysis_timeout_secs,
            analysis_workers,
            poll_interval_secs,
            cors_origins,
            default_strategy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_round_trips_through_names() {
        for s in Strategy::ALL {
            assert_eq!(Strategy::parse(s.as_str()), Some(s));
        }
        assert_eq!(Strategy::parse("yolo"), None);
    }

    #[test]
    fn enums_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&Strategy::SafeSteady).unwrap(),
            "\"safe_steady\""
        );
        assert_eq!(
            serde_json::to_string(&ExecutionMode::Patient).unwrap(),
            "\"patient\""
        );
        assert_eq!(
            serde_json::to_string(&TrendDirection::Stable).unwrap(),
            "\"stable\""
        );
        assert_eq!(serde_json::to_string(&RunStatus::Idle).unwrap(), "\"idle\"");
    }
}
