//! Durable, append-only storage of analysis runs.
//!
//! `runs` holds the full scored payload as a self-describing JSON blob;
//! `run_sets` is the compact projection powering the history views without
//! decoding the blob. WAL mode keeps readers unblocked during appends.

use crate::error::ApiError;
use crate::models::{
    AnalysisResult, ExecutionMode, RunDetail, RunSetRow, RunSummary, StoreStats, Strategy,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use tracing::{info, warn};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -16000;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS runs (
    run_id INTEGER PRIMARY KEY,
    timestamp TEXT NOT NULL,
    strategy TEXT NOT NULL,
    execution_mode TEXT NOT NULL,
    total_sets INTEGER NOT NULL,
    profitable_sets INTEGER NOT NULL,
    payload_blob TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS run_sets (
    run_id INTEGER NOT NULL REFERENCES runs(run_id),
    set_slug TEXT NOT NULL,
    set_name TEXT NOT NULL,
    profit_margin REAL NOT NULL,
    lowest_price REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_run_sets_run
    ON run_sets(run_id);

CREATE INDEX IF NOT EXISTS idx_run_sets_slug
    ON run_sets(set_slug, run_id DESC);
"#;

pub struct RunStore {
    conn: Mutex<Connection>,
}

impl RunStore {
    pub fn new(db_path: &str) -> Result<Self, ApiError> {
        if let Some(dir) = std::path::Path::new(db_path).parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .map_err(|e| ApiError::Config(format!("create {}: {e}", dir.display())))?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(db_path, flags)
            .map_err(|e| ApiError::Config(format!("open database {db_path}: {e}")))?;

        conn.execute_batch(SCHEMA_SQL)?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" {
            warn!(journal_mode, "WAL mode not active");
        }

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))
            .unwrap_or(0);
        info!(db_path, runs = count, "run store initialized");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Next id to assign. Callers (the orchestrator) are the only writer, so
    /// reserving an id before the row exists is safe under single-flight.
    pub fn next_run_id(&self) -> Result<i64, ApiError> {
        let conn = self.conn.lock();
        let max: Option<i64> =
            conn.query_row("SELECT MAX(run_id) FROM runs", [], |row| row.get(0))?;
        Ok(max.unwrap_or(0) + 1)
    }

    /// Persist one run atomically: the run row and every projection row
    /// commit in a single transaction. Returns the stored id.
    pub fn append(&self, result: &AnalysisResult) -> Result<i64, ApiError> {
        let payload = serde_json::to_string(result)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let run_id = match result.run_id {
            Some(id) => id,
            None => {
                let max: Option<i64> =
                    tx.query_row("SELECT MAX(run_id) FROM runs", [], |row| row.get(0))?;
                max.unwrap_or(0) + 1
            }
        };

        tx.execute(
            "INSERT INTO runs (run_id, timestamp, strategy, execution_mode, total_sets, profitable_sets, payload_blob)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run_id,
                result.timestamp.to_rfc3339(),
                result.strategy.as_str(),
                result.execution_mode.as_str(),
                result.total_sets,
                result.profitable_sets,
                payload,
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO run_sets (run_id, set_slug, set_name, profit_margin, lowest_price)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for set in &result.sets {
                stmt.execute(params![
                    run_id,
                    set.set_slug,
                    set.set_name,
                    set.profit_margin,
                    set.set_price,
                ])?;
            }
        }

        tx.commit()?;
        Ok(run_id)
    }

    pub fn latest_run_id(&self) -> Result<Option<i64>, ApiError> {
        let conn = self.conn.lock();
        let max: Option<i64> =
            conn.query_row("SELECT MAX(run_id) FROM runs", [], |row| row.get(0))?;
        Ok(max)
    }

    /// Paged summaries, newest first. Pages are 1-based.
    pub fn list(&self, page: u32, page_size: u32) -> Result<Vec<RunSummary>, ApiError> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, 500);
        let offset = (page - 1) as i64 * page_size as i64;

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT run_id, timestamp, strategy, execution_mode, total_sets, profitable_sets
             FROM runs ORDER BY run_id DESC LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![page_size, offset], row_to_summary)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn get(&self, run_id: i64) -> Result<RunDetail, ApiError> {
        let conn = self.conn.lock();
        let summary = conn
            .query_row(
                "SELECT run_id, timestamp, strategy, execution_mode, total_sets, profitable_sets
                 FROM runs WHERE run_id = ?1",
                params![run_id],
                row_to_summary,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    ApiError::NotFound(format!("run {run_id}"))
                }
                other => ApiError::from(other),
            })?;

        let mut stmt = conn.prepare(
            "SELECT set_slug, set_name, profit_margin, lowest_price
             FROM run_sets WHERE run_id = ?1 ORDER BY profit_margin DESC, set_slug ASC",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(RunSetRow {
                set_slug: row.get(0)?,
                set_name: row.get(1)?,
                profit_margin: row.get(2)?,
                lowest_price: row.get(3)?,
            })
        })?;
        let mut sets = Vec::new();
        for row in rows {
            sets.push(row?);
        }

        Ok(RunDetail { summary, sets })
    }

    /// Decode the full scored payload for one run.
    pub fn get_full(&self, run_id: i64) -> Result<AnalysisResult, ApiError> {
        let conn = self.conn.lock();
        let blob: String = conn
            .query_row(
                "SELECT payload_blob FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    ApiError::NotFound(format!("run {run_id}"))
                }
                other => ApiError::from(other),
            })?;
        Ok(serde_json::from_str(&blob)?)
    }

    /// Per-set appearance history across runs, newest first.
    pub fn set_history(&self, slug: &str, limit: u32) -> Result<Vec<(RunSummary, RunSetRow)>, ApiError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT r.run_id, r.timestamp, r.strategy, r.execution_mode, r.total_sets, r.profitable_sets,
                    s.set_slug, s.set_name, s.profit_margin, s.lowest_price
             FROM run_sets s JOIN runs r ON r.run_id = s.run_id
             WHERE s.set_slug = ?1 ORDER BY r.run_id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![slug, limit.clamp(1, 500)], |row| {
            Ok((
                RunSummary {
                    run_id: row.get(0)?,
                    timestamp: parse_ts(row.get::<_, String>(1)?),
                    strategy: parse_strategy(row.get::<_, String>(2)?),
                    execution_mode: parse_mode(row.get::<_, String>(3)?),
                    total_sets: row.get(4)?,
                    profitable_sets: row.get(5)?,
                },
                RunSetRow {
                    set_slug: row.get(6)?,
                    set_name: row.get(7)?,
                    profit_margin: row.get(8)?,
                    lowest_price: row.get(9)?,
                },
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn stats(&self, db_path: &str) -> Result<StoreStats, ApiError> {
        let conn = self.conn.lock();
        let run_count: i64 = conn.query_row("SELECT COUNT(*) FROM runs", [], |r| r.get(0))?;
        let run_set_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM run_sets", [], |r| r.get(0))?;
        let (first, last): (Option<String>, Option<String>) = conn.query_row(
            "SELECT MIN(timestamp), MAX(timestamp) FROM runs",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;

        let db_bytes = std::fs::metadata(db_path).map(|m| m.len()).unwrap_or(0);

        Ok(StoreStats {
            run_count: run_count as u64,
            run_set_count: run_set_count as u64,
            db_bytes,
            first_run_at: first.map(parse_ts),
            last_run_at: last.map(parse_ts),
        })
    }

    /// Every persisted run, oldest first, fully decoded. Export only; the
    /// hot paths never decode more than one blob.
    pub fn export_all(&self) -> Result<Vec<AnalysisResult>, ApiError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT payload_blob FROM runs ORDER BY run_id ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunSummary> {
    Ok(RunSummary {
        run_id: row.get(0)?,
        timestamp: parse_ts(row.get::<_, String>(1)?),
        strategy: parse_strategy(row.get::<_, String>(2)?),
        execution_mode: parse_mode(row.get::<_, String>(3)?),
        total_sets: row.get(4)?,
        profitable_sets: row.get(5)?,
    })
}

fn parse_ts(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

fn parse_strategy(raw: String) -> Strategy {
    Strategy::parse(&raw).unwrap_or(Strategy::Balanced)
}

fn parse_mode(raw: String) -> ExecutionMode {
    ExecutionMode::parse(&raw).unwrap_or(ExecutionMode::Instant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::liquidity::ActivityMetrics;
    use crate::analysis::profit::{self, PartQuote};
    use crate::analysis::scoring::{self, StrategyProfile};

    fn store() -> (RunStore, tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join("runs.sqlite")
            .to_string_lossy()
            .into_owned();
        (RunStore::new(&path).unwrap(), dir, path)
    }

    fn sample_result(run_id: Option<i64>) -> AnalysisResult {
        let quotes = vec![PartQuote {
            slug: "demo_blade".into(),
            name: "Demo Blade".into(),
            quantity: 2,
            instant_unit: Some(20.0),
            patient_unit: Some(21.0),
        }];
        let breakdown =
            profit::compute(Some(150.0), Some(149.0), &quotes, ExecutionMode::Instant);
        let mut datum = scoring::build_datum(
            "demo_set",
            "Demo Set",
            breakdown,
            ActivityMetrics {
                volume_48h: 100,
                bid_ask_ratio: 1.2,
                velocity: 1.0,
                ..Default::default()
            },
            None,
        );
        scoring::score_datum(&mut datum, &StrategyProfile::of(Strategy::Balanced));

        AnalysisResult {
            run_id,
            timestamp: Utc::now(),
            strategy: Strategy::Balanced,
            execution_mode: ExecutionMode::Instant,
            total_sets: 1,
            profitable_sets: 1,
            sets: vec![datum],
        }
    }

    #[test]
    fn append_then_get_full_round_trips_exactly() {
        let (store, _dir, _path) = store();
        let result = sample_result(Some(1));

        let id = store.append(&result).unwrap();
        assert_eq!(id, 1);

        let loaded = store.get_full(id).unwrap();
        assert_eq!(
            serde_json::to_string(&result).unwrap(),
            serde_json::to_string(&loaded).unwrap()
        );
    }

    #[test]
    fn ids_are_strictly_monotonic_and_list_is_newest_first() {
        let (store, _dir, _path) = store();
        for _ in 0..3 {
            let id = store.next_run_id().unwrap();
            store.append(&sample_result(Some(id))).unwrap();
        }

        let summaries = store.list(1, 10).unwrap();
        let ids: Vec<i64> = summaries.iter().map(|s| s.run_id).collect();
        assert_eq!(ids, [3, 2, 1]);

        assert_eq!(store.latest_run_id().unwrap(), Some(3));
        assert_eq!(store.next_run_id().unwrap(), 4);
    }

    #[test]
    fn ids_tolerate_gaps() {
        let (store, _dir, _path) = store();
        store.append(&sample_result(Some(7))).unwrap();
        assert_eq!(store.next_run_id().unwrap(), 8);
        store.append(&sample_result(Some(8))).unwrap();
        let ids: Vec<i64> = store.list(1, 10).unwrap().iter().map(|s| s.run_id).collect();
        assert_eq!(ids, [8, 7]);
    }

    #[test]
    fn detail_projects_without_decoding_the_blob() {
        let (store, _dir, _path) = store();
        let id = store.append(&sample_result(Some(1))).unwrap();

        let detail = store.get(id).unwrap();
        assert_eq!(detail.summary.run_id, 1);
        assert_eq!(detail.sets.len(), 1);
        assert_eq!(detail.sets[0].set_slug, "demo_set");
        assert_eq!(detail.sets[0].profit_margin, 110.0);
        assert_eq!(detail.sets[0].lowest_price, 150.0);
    }

    #[test]
    fn missing_run_is_not_found() {
        let (store, _dir, _path) = store();
        assert!(matches!(store.get(42), Err(ApiError::NotFound(_))));
        assert!(matches!(store.get_full(42), Err(ApiError::NotFound(_))));
    }

    #[test]
    fn set_history_tracks_runs_newest_first() {
        let (store, _dir, _path) = store();
        for id in 1..=2 {
            store.append(&sample_result(Some(id))).unwrap();
        }
        let history = store.set_history("demo_set", 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].0.run_id, 2);
        assert_eq!(history[1].0.run_id, 1);
        assert!(store.set_history("nope_set", 10).unwrap().is_empty());
    }

    #[test]
    fn stats_count_rows_and_bytes() {
        let (store, _dir, path) = store();
        store.append(&sample_result(Some(1))).unwrap();

        let stats = store.stats(&path).unwrap();
        assert_eq!(stats.run_count, 1);
        assert_eq!(stats.run_set_count, 1);
        assert!(stats.db_bytes > 0);
        assert!(stats.first_run_at.is_some());
    }

    #[test]
    fn export_returns_every_run_oldest_first() {
        let (store, _dir, _path) = store();
        for id in 1..=3 {
            store.append(&sample_result(Some(id))).unwrap();
        }
        let all = store.export_all().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].run_id, Some(1));
        assert_eq!(all[2].run_id, Some(3));
    }
}
