//! Upstream-facing plumbing: rate limiting, the typed HTTP client, and the
//! file-backed set catalog.

pub mod catalog;
pub mod client;
pub mod rate_limiter;

pub use catalog::{CatalogCache, CatalogSnapshot};
pub use client::{ItemDetail, ItemEntry, MarketClient, MarketDataSource};
pub use rate_limiter::RequestLimiter;
