//! End-to-end engine test: run the orchestrator against a fake upstream,
//! persist, re-read, and rescore.

use async_trait::async_trait;
use setscout_backend::analysis::orchestrator::{AnalysisOrchestrator, RunParams};
use setscout_backend::analysis::scoring;
use setscout_backend::error::ApiError;
use setscout_backend::market::client::{ItemDetail, ItemEntry};
use setscout_backend::market::CatalogCache;
use setscout_backend::models::{
    ExecutionMode, OrderBook, OrderEntry, RunStatus, SetComponent, StatPoint, Strategy,
};
use setscout_backend::storage::RunStore;
use setscout_backend::MarketDataSource;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct FakeMarket {
    books: HashMap<String, OrderBook>,
    stats: HashMap<String, Vec<StatPoint>>,
}

impl FakeMarket {
    /// Two sets: one clearly profitable, one under water.
    fn new() -> Self {
        let mut books = HashMap::new();
        let mut stats = HashMap::new();

        books.insert("good_set".into(), book(&[(150.0, 1)], &[(150.0, 1)]));
        books.insert("good_blade".into(), book(&[(30.0, 1)], &[(28.0, 1)]));
        books.insert("good_hilt".into(), book(&[(20.0, 2)], &[(18.0, 2)]));

        books.insert("bad_set".into(), book(&[(40.0, 1)], &[(35.0, 1)]));
        books.insert("bad_core".into(), book(&[(60.0, 1)], &[(55.0, 1)]));

        let base = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        for slug in ["good_set", "bad_set"] {
            let series: Vec<StatPoint> = (0..4)
                .map(|i| StatPoint {
                    datetime: base + ChronoDuration::hours(i * 12),
                    volume: 30,
                    median: 70.0,
                    moving_avg: Some(70.0),
                })
                .collect();
            stats.insert(slug.to_string(), series);
        }

        Self { books, stats }
    }
}

fn book(sell: &[(f64, u32)], buy: &[(f64, u32)]) -> OrderBook {
    OrderBook {
        sell: sell
            .iter()
            .map(|&(price, quantity)| OrderEntry {
                price,
                quantity,
                online: true,
            })
            .collect(),
        buy: buy
            .iter()
            .map(|&(price, quantity)| OrderEntry {
                price,
                quantity,
                online: true,
            })
            .collect(),
    }
}

#[async_trait]
impl MarketDataSource for FakeMarket {
    async fn list_items(&self) -> Result<Vec<ItemEntry>, ApiError> {
        Ok(["good_set", "bad_set", "good_blade"]
            .iter()
            .map(|s| ItemEntry {
                slug: s.to_string(),
                name: s.replace('_', " "),
            })
            .collect())
    }

    async fn item_detail(&self, slug: &str) -> Result<ItemDetail, ApiError> {
        let parts = match slug {
            "good_set" => vec![
                SetComponent {
                    slug: "good_blade".into(),
                    name: "Good Blade".into(),
                    quantity: 1,
                },
                SetComponent {
                    slug: "good_hilt".into(),
                    name: "Good Hilt".into(),
                    quantity: 2,
                },
            ],
            "bad_set" => vec![SetComponent {
                slug: "bad_core".into(),
                name: "Bad Core".into(),
                quantity: 1,
            }],
            _ => return Err(ApiError::NotFound(slug.to_string())),
        };
        Ok(ItemDetail {
            slug: slug.to_string(),
            name: slug.replace('_', " "),
            parts,
        })
    }

    async fn top_orders(&self, slug: &str) -> Result<OrderBook, ApiError> {
        Ok(self.books.get(slug).cloned().unwrap_or_default())
    }

    async fn statistics_48h(&self, slug: &str) -> Result<Vec<StatPoint>, ApiError> {
        Ok(self.stats.get(slug).cloned().unwrap_or_default())
    }
}

#[tokio::test]
async fn full_run_persists_and_replays() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        RunStore::new(&dir.path().join("runs.sqlite").to_string_lossy()).unwrap(),
    );
    let catalog = Arc::new(CatalogCache::new(&dir.path().to_string_lossy()));
    let orchestrator = AnalysisOrchestrator::new(
        Arc::new(FakeMarket::new()),
        catalog,
        store.clone(),
        4,
        Duration::from_secs(30),
    );

    let mut progress = orchestrator.subscribe();
    let result = orchestrator
        .run_blocking(RunParams {
            strategy: Strategy::Balanced,
            execution_mode: ExecutionMode::Instant,
            test_mode: false,
        })
        .await
        .unwrap();

    // The unprofitable set is retained but not counted.
    assert_eq!(result.total_sets, 2);
    assert_eq!(result.profitable_sets, 1);
    assert_eq!(result.sets[0].set_slug, "good_set");
    assert_eq!(result.sets[0].profit_margin, 80.0);
    assert_eq!(result.sets[1].composite_score, 0.0);

    // Ordering invariant holds for the persisted payload too.
    let run_id = result.run_id.unwrap();
    let stored = store.get_full(run_id).unwrap();
    for pair in stored.sets.windows(2) {
        assert!(pair[0].composite_score >= pair[1].composite_score);
    }

    // Projection rows agree with the payload.
    let detail = store.get(run_id).unwrap();
    assert_eq!(detail.summary.total_sets, 2);
    assert_eq!(detail.sets.len(), 2);

    // Progress reached 100 exactly once, monotonic on the way.
    let mut last = 0u8;
    let mut completed = 0;
    while let Ok(update) = progress.try_recv() {
        if let Some(p) = update.progress {
            assert!(p >= last);
            last = p;
        }
        if update.status == RunStatus::Completed {
            completed += 1;
        }
    }
    assert_eq!(completed, 1);
    assert_eq!(last, 100);

    // Rescoring the stored payload twice is byte-stable.
    let once = scoring::rescore(&stored, Strategy::Aggressive, ExecutionMode::Patient);
    let twice = scoring::rescore(&stored, Strategy::Aggressive, ExecutionMode::Patient);
    assert_eq!(
        serde_json::to_string(&once).unwrap(),
        serde_json::to_string(&twice).unwrap()
    );
    assert_eq!(once.sets.iter().filter(|s| s.profitable).count() as u32, once.profitable_sets);
}
