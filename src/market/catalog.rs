//! Set catalog with content-hash driven invalidation.
//!
//! The catalog index is cheap to fetch; the per-set decompositions are not
//! (one rate-limited call each). A SHA-256 hash over the normalized index
//! decides whether the persisted snapshot can be reused. There is no TTL.

use crate::error::ApiError;
use crate::market::client::MarketDataSource;
use crate::models::SetInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{info, warn};

const SNAPSHOT_FILE: &str = "catalog.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub hash: String,
    pub refreshed_at: DateTime<Utc>,
    pub sets: Vec<SetInfo>,
}

/// File-backed catalog of known sets. The in-memory snapshot is read-mostly;
/// refresh takes the write lock only to swap the whole snapshot.
pub struct CatalogCache {
    path: PathBuf,
    snapshot: RwLock<Option<CatalogSnapshot>>,
}

impl CatalogCache {
    pub fn new(cache_dir: &str) -> Self {
        let path = Path::new(cache_dir).join(SNAPSHOT_FILE);
        let snapshot = Self::load_file(&path);
        if let Some(snap) = &snapshot {
            info!(
                sets = snap.sets.len(),
                refreshed_at = %snap.refreshed_at,
                "loaded catalog snapshot"
            );
        }
        Self {
            path,
            snapshot: RwLock::new(snapshot),
        }
    }

    /// A corrupt or missing snapshot file is treated as absent.
    fn load_file(path: &Path) -> Option<CatalogSnapshot> {
        let raw = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(snap) => Some(snap),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "catalog snapshot unreadable, ignoring");
                None
            }
        }
    }

    pub async fn sets(&self) -> Vec<SetInfo> {
        self.snapshot
            .read()
            .await
            .as_ref()
            .map(|s| s.sets.clone())
            .unwrap_or_default()
    }

    pub async fn get(&self, slug: &str) -> Option<SetInfo> {
        self.snapshot
            .read()
            .await
            .as_ref()
            .and_then(|s| s.sets.iter().find(|set| set.slug == slug).cloned())
    }

    pub async fn snapshot_meta(&self) -> Option<(String, DateTime<Utc>, usize)> {
        self.snapshot
            .read()
            .await
            .as_ref()
            .map(|s| (s.hash.clone(), s.refreshed_at, s.sets.len()))
    }

    /// Hash over the normalized (sorted) set index.
    fn content_hash(entries: &[(String, String)]) -> String {
        let mut hasher = Sha256::new();
        for (slug, name) in entries {
            hasher.update(slug.as_bytes());
            hasher.update([0x1f]);
            hasher.update(name.as_bytes());
            hasher.update([b'\n']);
        }
        hex::encode(hasher.finalize())
    }

    /// Fetch the catalog index and refetch every set's decomposition only
    /// when the index content changed. Returns the current set list.
    pub async fn refresh_if_stale(
        &self,
        source: &dyn MarketDataSource,
    ) -> Result<Vec<SetInfo>, ApiError> {
        let items = source.list_items().await?;

        let mut index: Vec<(String, String)> = items
            .into_iter()
            .filter(|i| i.slug.ends_with("_set"))
            .map(|i| (i.slug, i.name))
            .collect();
        index.sort_by(|a, b| a.0.cmp(&b.0));

        let hash = Self::content_hash(&index);

        if let Some(snap) = self.snapshot.read().await.as_ref() {
            if snap.hash == hash {
                return Ok(snap.sets.clone());
            }
        }

        info!(sets = index.len(), "catalog changed, refetching decompositions");

        let mut sets = Vec::with_capacity(index.len());
        for (slug, name) in &index {
            match source.item_detail(slug).await {
                Ok(detail) => sets.push(SetInfo {
                    slug: detail.slug,
                    name: if detail.name == *slug {
                        name.clone()
                    } else {
                        detail.name
                    },
                    parts: detail.parts,
                }),
                // A set delisted between the index fetch and now is skipped,
                // not fatal.
                Err(ApiError::NotFound(_)) => {
                    warn!(slug, "set vanished during refresh, skipping");
                }
                Err(e) => return Err(e),
            }
        }

        let snap = CatalogSnapshot {
            hash,
            refreshed_at: Utc::now(),
            sets: sets.clone(),
        };
        self.persist(&snap)?;
        *self.snapshot.write().await = Some(snap);

        Ok(sets)
    }

    /// Atomic snapshot replacement: write a temp file, then rename over.
    fn persist(&self, snap: &CatalogSnapshot) -> Result<(), ApiError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| ApiError::Storage(format!("create {}: {e}", dir.display())))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(snap)?;
        std::fs::write(&tmp, body)
            .map_err(|e| ApiError::Storage(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| ApiError::Storage(format!("rename {}: {e}", self.path.display())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::client::{ItemDetail, ItemEntry};
    use crate::models::{OrderBook, SetComponent, StatPoint};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSource {
        items: Vec<ItemEntry>,
        detail_calls: AtomicUsize,
    }

    impl FakeSource {
        fn new(slugs: &[&str]) -> Self {
            Self {
                items: slugs
                    .iter()
                    .map(|s| ItemEntry {
                        slug: s.to_string(),
                        name: s.replace('_', " "),
                    })
                    .collect(),
                detail_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MarketDataSource for FakeSource {
        async fn list_items(&self) -> Result<Vec<ItemEntry>, ApiError> {
            Ok(self.items.clone())
        }

        async fn item_detail(&self, slug: &str) -> Result<ItemDetail, ApiError> {
            self.detail_calls.fetch_add(1, Ordering::SeqCst);
            Ok(ItemDetail {
                slug: slug.to_string(),
                name: slug.replace('_', " "),
                parts: vec![SetComponent {
                    slug: format!("{}_part", slug.trim_end_matches("_set")),
                    name: "part".into(),
                    quantity: 1,
                }],
            })
        }

        async fn top_orders(&self, _slug: &str) -> Result<OrderBook, ApiError> {
            Ok(OrderBook::default())
        }

        async fn statistics_48h(&self, _slug: &str) -> Result<Vec<StatPoint>, ApiError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn refresh_filters_sets_and_persists_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CatalogCache::new(dir.path().to_str().unwrap());
        let source = FakeSource::new(&["demo_set", "demo_blade", "other_set"]);

        let sets = cache.refresh_if_stale(&source).await.unwrap();
        assert_eq!(sets.len(), 2);
        assert!(sets.iter().all(|s| s.slug.ends_with("_set")));

        // Snapshot file is valid JSON on disk.
        let raw = std::fs::read_to_string(dir.path().join("catalog.json")).unwrap();
        let snap: CatalogSnapshot = serde_json::from_str(&raw).unwrap();
        assert_eq!(snap.sets.len(), 2);
    }

    #[tokio::test]
    async fn unchanged_hash_skips_detail_refetch() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CatalogCache::new(dir.path().to_str().unwrap());
        let source = FakeSource::new(&["demo_set"]);

        cache.refresh_if_stale(&source).await.unwrap();
        let after_first = source.detail_calls.load(Ordering::SeqCst);
        cache.refresh_if_stale(&source).await.unwrap();
        assert_eq!(source.detail_calls.load(Ordering::SeqCst), after_first);
    }

    #[tokio::test]
    async fn changed_index_triggers_refetch() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CatalogCache::new(dir.path().to_str().unwrap());

        let source = FakeSource::new(&["demo_set"]);
        cache.refresh_if_stale(&source).await.unwrap();

        let grown = FakeSource::new(&["demo_set", "new_set"]);
        let sets = cache.refresh_if_stale(&grown).await.unwrap();
        assert_eq!(sets.len(), 2);
        assert!(grown.detail_calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("catalog.json"), "{ not json").unwrap();

        let cache = CatalogCache::new(dir.path().to_str().unwrap());
        assert!(cache.sets().await.is_empty());

        // A refresh rebuilds a valid snapshot in its place.
        let source = FakeSource::new(&["demo_set"]);
        let sets = cache.refresh_if_stale(&source).await.unwrap();
        assert_eq!(sets.len(), 1);
    }

    #[test]
    fn content_hash_is_order_insensitive_after_normalization() {
        let a = vec![
            ("a_set".to_string(), "A Set".to_string()),
            ("b_set".to_string(), "B Set".to_string()),
        ];
        let mut b = a.clone();
        b.reverse();
        b.sort_by(|x, y| x.0.cmp(&y.0));
        assert_eq!(
            CatalogCache::content_hash(&a),
            CatalogCache::content_hash(&b)
        );

        let c = vec![("a_set".to_string(), "Renamed".to_string())];
        assert_ne!(
            CatalogCache::content_hash(&a),
            CatalogCache::content_hash(&c)
        );
    }
}
