//! SetScout Backend Library
//!
//! Exposes the standalone core modules for integration tests and tooling.
//! The HTTP handlers depend on `AppState` from `main.rs` and are declared
//! only by the binary.

pub mod analysis;
pub mod error;
pub mod market;
pub mod middleware;
pub mod models;
pub mod storage;

pub use analysis::{AnalysisOrchestrator, RunParams, StrategyProfile};
pub use error::ApiError;
pub use market::{CatalogCache, MarketClient, MarketDataSource, RequestLimiter};
pub use storage::RunStore;
