//! Typed client for the upstream marketplace API.
//!
//! Every request funnels through the process-wide [`RequestLimiter`] before
//! touching the network, carries its own timeout, and retries transient
//! failures with jittered exponential backoff. The upstream JSON is loosely
//! shaped; wire structs parse the fields we consume and ignore the rest.

use crate::error::ApiError;
use crate::market::rate_limiter::RequestLimiter;
use crate::models::{OrderBook, OrderEntry, SetComponent, StatPoint};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1_000;
const MAX_BACKOFF_MS: u64 = 30_000;
const BACKOFF_JITTER_MS: u64 = 250;

/// Catalog index entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemEntry {
    pub slug: String,
    pub name: String,
}

/// Parts decomposition of one composite item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemDetail {
    pub slug: String,
    pub name: String,
    pub parts: Vec<SetComponent>,
}

/// Upstream market endpoints, abstracted so the orchestrator and catalog can
/// be driven by a fake source in tests.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn list_items(&self) -> Result<Vec<ItemEntry>, ApiError>;
    async fn item_detail(&self, slug: &str) -> Result<ItemDetail, ApiError>;
    async fn top_orders(&self, slug: &str) -> Result<OrderBook, ApiError>;
    async fn statistics_48h(&self, slug: &str) -> Result<Vec<StatPoint>, ApiError>;
}

pub struct MarketClient {
    client: Client,
    base_url: String,
    limiter: Arc<RequestLimiter>,
    request_timeout: Duration,
}

impl MarketClient {
    pub fn new(
        base_url: &str,
        limiter: Arc<RequestLimiter>,
        request_timeout_secs: u64,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .user_agent("SetScout/0.1 (set profit analyzer)")
            .build()
            .map_err(|e| ApiError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter,
            request_timeout: Duration::from_secs(request_timeout_secs),
        })
    }

    #[inline]
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET + JSON decode with retry. Transient failures (connect errors,
    /// timeouts, 5xx, 429) are retried up to [`MAX_RETRIES`] times; other
    /// 4xx fail immediately.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        let mut backoff = INITIAL_BACKOFF_MS;
        let mut last_err = ApiError::UpstreamUnavailable(format!("GET {path}: no attempt made"));

        for attempt in 0..MAX_RETRIES {
            self.limiter.acquire().await;

            match timeout(self.request_timeout, self.client.get(&url).send()).await {
                Ok(Ok(resp)) => {
                    let status = resp.status();
                    if status.is_success() {
                        let text = resp.text().await.map_err(|e| {
                            ApiError::UpstreamUnavailable(format!("GET {path}: {e}"))
                        })?;
                        return serde_json::from_str(&text)
                            .map_err(|e| ApiError::Parse(format!("GET {path}: {e}")));
                    } else if status == StatusCode::TOO_MANY_REQUESTS {
                        warn!(path, attempt, "upstream rate limited, backing off");
                        last_err = ApiError::RateLimited(format!("GET {path}: 429"));
                    } else if status == StatusCode::NOT_FOUND {
                        return Err(ApiError::NotFound(format!("GET {path}: 404")));
                    } else if status.is_server_error() {
                        let body = resp.text().await.unwrap_or_default();
                        warn!(path, %status, "upstream error");
                        last_err =
                            ApiError::UpstreamUnavailable(format!("GET {path} {status}: {body}"));
                    } else {
                        // Remaining 4xx are our fault; retrying won't help.
                        let body = resp.text().await.unwrap_or_default();
                        return Err(ApiError::UpstreamUnavailable(format!(
                            "GET {path} {status}: {body}"
                        )));
                    }
                }
                Ok(Err(e)) => {
                    warn!(path, attempt, error = %e, "request failed");
                    last_err = ApiError::UpstreamUnavailable(format!("GET {path}: {e}"));
                }
                Err(_) => {
                    warn!(path, attempt, "request timed out");
                    last_err = ApiError::Timeout(format!(
                        "GET {path}: no response within {}s",
                        self.request_timeout.as_secs()
                    ));
                }
            }

            if attempt + 1 < MAX_RETRIES {
                let jitter = rand::thread_rng().gen_range(0..=BACKOFF_JITTER_MS);
                debug!(path, backoff_ms = backoff + jitter, "retrying");
                sleep(Duration::from_millis(backoff + jitter)).await;
                backoff = (backoff * 2).min(MAX_BACKOFF_MS);
            }
        }

        Err(last_err)
    }
}

#[async_trait]
impl MarketDataSource for MarketClient {
    async fn list_items(&self) -> Result<Vec<ItemEntry>, ApiError> {
        let envelope: ItemsEnvelope = self.get_json("/items").await?;
        Ok(envelope
            .payload
            .items
            .into_iter()
            .map(|w| ItemEntry {
                name: w.display_name(),
                slug: w.url_name,
            })
            .collect())
    }

    async fn item_detail(&self, slug: &str) -> Result<ItemDetail, ApiError> {
        let envelope: ItemEnvelope = self.get_json(&format!("/item/{slug}")).await?;
        let members = envelope.payload.item.items_in_set;

        let name = members
            .iter()
            .find(|m| m.url_name == slug)
            .map(|m| m.display_name())
            .unwrap_or_else(|| slug.to_string());

        let parts = members
            .into_iter()
            .filter(|m| m.url_name != slug && !m.set_root.unwrap_or(false))
            .map(|m| SetComponent {
                name: m.display_name(),
                quantity: m.quantity_for_set.unwrap_or(1).max(1),
                slug: m.url_name,
            })
            .collect();

        Ok(ItemDetail {
            slug: slug.to_string(),
            name,
            parts,
        })
    }

    async fn top_orders(&self, slug: &str) -> Result<OrderBook, ApiError> {
        let envelope: OrdersEnvelope = self.get_json(&format!("/orders/item/{slug}/top")).await?;
        Ok(envelope.payload.into_book())
    }

    async fn statistics_48h(&self, slug: &str) -> Result<Vec<StatPoint>, ApiError> {
        let envelope: StatsEnvelope = self.get_json(&format!("/items/{slug}/statistics")).await?;
        let mut points: Vec<StatPoint> = envelope
            .payload
            .statistics_closed
            .two_day
            .into_iter()
            .map(|w| StatPoint {
                datetime: w.datetime,
                volume: w.volume,
                median: w.median,
                moving_avg: w.moving_avg,
            })
            .collect();
        points.sort_by_key(|p| p.datetime);
        Ok(points)
    }
}

// ---------------------------------------------------------------------------
// Wire shapes. Unknown fields are ignored everywhere; required-field parse
// failures surface as `Parse` for the affected item, never for the run.

#[derive(Debug, Deserialize)]
struct ItemsEnvelope {
    #[serde(default)]
    payload: ItemsPayload,
}

#[derive(Debug, Default, Deserialize)]
struct ItemsPayload {
    #[serde(default)]
    items: Vec<WireItem>,
}

#[derive(Debug, Deserialize)]
struct WireItem {
    url_name: String,
    #[serde(default)]
    item_name: Option<String>,
    #[serde(default)]
    en: Option<WireLocale>,
}

#[derive(Debug, Deserialize)]
struct WireLocale {
    #[serde(default)]
    item_name: Option<String>,
}

impl WireItem {
    fn display_name(&self) -> String {
        self.item_name
            .clone()
            .or_else(|| self.en.as_ref().and_then(|l| l.item_name.clone()))
            .unwrap_or_else(|| self.url_name.clone())
    }
}

#[derive(Debug, Deserialize)]
struct ItemEnvelope {
    payload: ItemPayload,
}

#[derive(Debug, Deserialize)]
struct ItemPayload {
    item: WireItemDetail,
}

#[derive(Debug, Deserialize)]
struct WireItemDetail {
    #[serde(default)]
    items_in_set: Vec<WireSetMember>,
}

#[derive(Debug, Deserialize)]
struct WireSetMember {
    url_name: String,
    #[serde(default)]
    item_name: Option<String>,
    #[serde(default)]
    en: Option<WireLocale>,
    #[serde(default)]
    quantity_for_set: Option<u32>,
    #[serde(default)]
    set_root: Option<bool>,
}

impl WireSetMember {
    fn display_name(&self) -> String {
        self.item_name
            .clone()
            .or_else(|| self.en.as_ref().and_then(|l| l.item_name.clone()))
            .unwrap_or_else(|| self.url_name.clone())
    }
}

#[derive(Debug, Deserialize)]
struct OrdersEnvelope {
    #[serde(default)]
    payload: OrdersPayload,
}

/// The top-orders payload comes split into `sell`/`buy` arrays; some
/// deployments return one flat `orders` list tagged by `order_type`.
/// Both shapes are accepted.
#[derive(Debug, Default, Deserialize)]
struct OrdersPayload {
    #[serde(default)]
    sell: Vec<WireOrder>,
    #[serde(default)]
    buy: Vec<WireOrder>,
    #[serde(default)]
    orders: Vec<WireOrder>,
}

#[derive(Debug, Deserialize)]
struct WireOrder {
    #[serde(default)]
    platinum: f64,
    #[serde(default = "default_quantity")]
    quantity: u32,
    #[serde(default)]
    order_type: Option<String>,
    #[serde(default)]
    visible: Option<bool>,
    #[serde(default)]
    user: Option<WireUser>,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct WireUser {
    #[serde(default)]
    status: Option<String>,
}

impl WireOrder {
    fn online(&self) -> bool {
        matches!(
            self.user.as_ref().and_then(|u| u.status.as_deref()),
            Some("ingame") | Some("online")
        )
    }

    fn entry(&self) -> OrderEntry {
        OrderEntry {
            price: self.platinum,
            quantity: self.quantity,
            online: self.online(),
        }
    }
}

impl OrdersPayload {
    fn into_book(self) -> OrderBook {
        let mut sell: Vec<OrderEntry> = Vec::new();
        let mut buy: Vec<OrderEntry> = Vec::new();

        for order in self.sell {
            if order.visible != Some(false) {
                sell.push(order.entry());
            }
        }
        for order in self.buy {
            if order.visible != Some(false) {
                buy.push(order.entry());
            }
        }
        for order in self.orders {
            if order.visible == Some(false) {
                continue;
            }
            match order.order_type.as_deref() {
                Some("sell") => sell.push(order.entry()),
                Some("buy") => buy.push(order.entry()),
                _ => {}
            }
        }

        sell.sort_by(|a, b| a.price.total_cmp(&b.price));
        buy.sort_by(|a, b| b.price.total_cmp(&a.price));
        OrderBook { sell, buy }
    }
}

#[derive(Debug, Deserialize)]
struct StatsEnvelope {
    #[serde(default)]
    payload: StatsPayload,
}

#[derive(Debug, Default, Deserialize)]
struct StatsPayload {
    #[serde(default)]
    statistics_closed: StatsClosed,
}

#[derive(Debug, Default, Deserialize)]
struct StatsClosed {
    #[serde(default, rename = "48hours")]
    two_day: Vec<WireStatPoint>,
}

#[derive(Debug, Deserialize)]
struct WireStatPoint {
    datetime: DateTime<Utc>,
    #[serde(default)]
    volume: u32,
    #[serde(default)]
    median: f64,
    #[serde(default)]
    moving_avg: Option<f64>,
}
