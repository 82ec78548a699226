//! SQLite-backed metric store.
//!
//! Atomicity lives in the database: single updates are one upsert statement,
//! batches and restores run inside one transaction.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use metrics_model::{MetricRecord, MetricUpdate, Snapshot};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use super::retry::retry_transient;
use super::{CounterItem, GaugeItem, MetricStore};
use crate::{Error, Result};

/// Current schema version recorded in the `migrations` table.
const SCHEMA_VERSION: i64 = 1;

/// Default connection pool size.
const DEFAULT_POOL_SIZE: u32 = 5;

/// Default busy timeout in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

const UPSERT_GAUGE: &str = r#"
    INSERT INTO gauges (name, value) VALUES (?, ?)
    ON CONFLICT(name) DO UPDATE SET value = excluded.value
"#;

const UPSERT_COUNTER: &str = r#"
    INSERT INTO counters (name, value) VALUES (?, ?)
    ON CONFLICT(name) DO UPDATE SET value = counters.value + excluded.value
"#;

const REPLACE_COUNTER: &str = r#"
    INSERT INTO counters (name, value) VALUES (?, ?)
    ON CONFLICT(name) DO UPDATE SET value = excluded.value
"#;

const CREATE_SCHEMA: [&str; 2] = [
    r#"
    CREATE TABLE IF NOT EXISTS gauges (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT UNIQUE NOT NULL,
        value REAL NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS counters (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT UNIQUE NOT NULL,
        value INTEGER NOT NULL
    )
    "#,
];

/// Open a connection pool for `database_url` (e.g. `sqlite:metrics.db`).
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let connect_options = SqliteConnectOptions::from_str(database_url)?
        // Enable WAL mode for concurrent reads during writes
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(connect_options)
        .await?;

    debug!("Database pool initialized, {} max connections", max_connections);
    Ok(pool)
}

/// Relational store over two tables, `gauges` and `counters`.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and make sure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = init_pool(database_url, DEFAULT_POOL_SIZE).await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, creating the schema on first use.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS migrations \
             (id INTEGER PRIMARY KEY, version INTEGER NOT NULL)",
        )
        .execute(&self.pool)
        .await?;

        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM migrations WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        if version.unwrap_or(0) >= SCHEMA_VERSION {
            debug!("Schema is up to date (version {})", SCHEMA_VERSION);
            return Ok(());
        }

        info!("Creating metrics schema (version {})", SCHEMA_VERSION);
        let mut tx = self.pool.begin().await?;
        for stmt in CREATE_SCHEMA {
            sqlx::query(stmt).execute(&mut *tx).await?;
        }
        sqlx::query("INSERT OR REPLACE INTO migrations (id, version) VALUES (1, ?)")
            .bind(SCHEMA_VERSION)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn apply(tx: &mut Transaction<'_, Sqlite>, update: &MetricUpdate<'_>) -> Result<()> {
        match *update {
            MetricUpdate::Gauge { id, value } => {
                sqlx::query(UPSERT_GAUGE)
                    .bind(id)
                    .bind(value)
                    .execute(&mut **tx)
                    .await?;
            }
            MetricUpdate::Counter { id, delta } => {
                sqlx::query(UPSERT_COUNTER)
                    .bind(id)
                    .bind(delta)
                    .execute(&mut **tx)
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MetricStore for SqliteStore {
    async fn get_gauge(&self, name: &str) -> Result<f64> {
        retry_transient("get_gauge", || async {
            sqlx::query_scalar::<_, f64>("SELECT value FROM gauges WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| Error::not_found("gauge", name))
        })
        .await
    }

    async fn get_counter(&self, name: &str) -> Result<i64> {
        retry_transient("get_counter", || async {
            sqlx::query_scalar::<_, i64>("SELECT value FROM counters WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| Error::not_found("counter", name))
        })
        .await
    }

    async fn list_gauges(&self) -> Result<Vec<GaugeItem>> {
        retry_transient("list_gauges", || async {
            let rows = sqlx::query_as::<_, (String, f64)>(
                "SELECT name, value FROM gauges ORDER BY name",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows
                .into_iter()
                .map(|(name, value)| GaugeItem { name, value })
                .collect())
        })
        .await
    }

    async fn list_counters(&self) -> Result<Vec<CounterItem>> {
        retry_transient("list_counters", || async {
            let rows = sqlx::query_as::<_, (String, i64)>(
                "SELECT name, value FROM counters ORDER BY name",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows
                .into_iter()
                .map(|(name, value)| CounterItem { name, value })
                .collect())
        })
        .await
    }

    async fn update_gauge(&self, name: &str, value: f64) -> Result<()> {
        super::ensure_finite(name, value)?;
        retry_transient("update_gauge", || async {
            sqlx::query(UPSERT_GAUGE)
                .bind(name)
                .bind(value)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    async fn increment_counter(&self, name: &str, delta: i64) -> Result<()> {
        retry_transient("increment_counter", || async {
            sqlx::query(UPSERT_COUNTER)
                .bind(name)
                .bind(delta)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    async fn bulk_apply(&self, records: &[MetricRecord]) -> Result<()> {
        let updates: Vec<MetricUpdate<'_>> = records
            .iter()
            .filter_map(|record| {
                let update = record.update();
                if update.is_none() {
                    debug!(metric = %record.id, kind = %record.mtype, "Skipping invalid record");
                }
                update
            })
            .collect();

        if updates.is_empty() {
            return Ok(());
        }

        retry_transient("bulk_apply", || async {
            let mut tx = self.pool.begin().await?;
            for update in &updates {
                // Dropping `tx` on error rolls the whole batch back.
                Self::apply(&mut tx, update).await?;
            }
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    async fn snapshot(&self) -> Result<Snapshot> {
        retry_transient("snapshot", || async {
            // Both reads see the same committed state.
            let mut tx = self.pool.begin().await?;
            let gauges = sqlx::query_as::<_, (String, f64)>("SELECT name, value FROM gauges")
                .fetch_all(&mut *tx)
                .await?;
            let counters = sqlx::query_as::<_, (String, i64)>("SELECT name, value FROM counters")
                .fetch_all(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(Snapshot {
                gauges: gauges.into_iter().collect(),
                counters: counters.into_iter().collect(),
            })
        })
        .await
    }

    async fn load(&self, data: &[u8]) -> Result<()> {
        let snapshot = Snapshot::from_json(data)?;

        retry_transient("load", || async {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM gauges").execute(&mut *tx).await?;
            sqlx::query("DELETE FROM counters").execute(&mut *tx).await?;
            for (name, value) in &snapshot.gauges {
                sqlx::query(UPSERT_GAUGE)
                    .bind(name)
                    .bind(*value)
                    .execute(&mut *tx)
                    .await?;
            }
            for (name, value) in &snapshot.counters {
                sqlx::query(REPLACE_COUNTER)
                    .bind(name)
                    .bind(*value)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        info!("Database pool closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn memory_store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_schema_is_created_with_marker() {
        let store = memory_store().await;

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .fetch_all(store.pool())
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert!(names.contains(&"migrations"));
        assert!(names.contains(&"gauges"));
        assert!(names.contains(&"counters"));

        let version: i64 = sqlx::query_scalar("SELECT version FROM migrations WHERE id = 1")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("metrics.db").display());

        let store = SqliteStore::connect(&url).await.unwrap();
        store.increment_counter("PollCount", 5).await.unwrap();
        store.close().await.unwrap();

        let reopened = SqliteStore::connect(&url).await.unwrap();
        assert_eq!(reopened.get_counter("PollCount").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_upserts() {
        let store = memory_store().await;

        store.increment_counter("PollCount", 3).await.unwrap();
        store.increment_counter("PollCount", -1).await.unwrap();
        store.update_gauge("Temp", 2.5).await.unwrap();
        store.update_gauge("Temp", 7.25).await.unwrap();

        assert_eq!(store.get_counter("PollCount").await.unwrap(), 2);
        assert_eq!(store.get_gauge("Temp").await.unwrap(), 7.25);
        assert_eq!(
            store.list_counters().await.unwrap(),
            vec![CounterItem::new("PollCount", 2)]
        );
        assert_eq!(
            store.list_gauges().await.unwrap(),
            vec![GaugeItem::new("Temp", 7.25)]
        );
    }

    #[tokio::test]
    async fn test_missing_metric_is_not_found() {
        let store = memory_store().await;
        assert!(store.get_gauge("nope").await.unwrap_err().is_not_found());
        assert!(store.get_counter("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_bulk_apply_twice_accumulates() {
        let store = memory_store().await;
        let batch = vec![
            MetricRecord::counter("qwe", 3),
            MetricRecord::query("skipped", metrics_model::MetricType::Gauge),
        ];
        store.bulk_apply(&batch).await.unwrap();
        store.bulk_apply(&batch).await.unwrap();

        assert_eq!(store.get_counter("qwe").await.unwrap(), 6);
        assert!(store.get_gauge("skipped").await.is_err());
    }

    #[tokio::test]
    async fn test_bulk_apply_rolls_back_on_statement_failure() {
        let store = memory_store().await;
        store.increment_counter("a", 1).await.unwrap();

        sqlx::query(
            "CREATE TRIGGER reject_broken BEFORE INSERT ON gauges WHEN NEW.name = 'broken' \
             BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let batch = vec![
            MetricRecord::counter("a", 10),
            MetricRecord::gauge("b", 1.0),
            MetricRecord::gauge("broken", 2.0),
        ];
        assert!(store.bulk_apply(&batch).await.is_err());

        assert_eq!(store.get_counter("a").await.unwrap(), 1);
        assert!(store.get_gauge("b").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_non_finite_gauges_are_rejected() {
        let store = memory_store().await;

        let err = store.update_gauge("x", f64::NAN).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let batch = vec![
            MetricRecord::gauge("inf", f64::INFINITY),
            MetricRecord::counter("PollCount", 7),
        ];
        store.bulk_apply(&batch).await.unwrap();
        assert!(store.get_gauge("inf").await.unwrap_err().is_not_found());
        assert_eq!(store.get_counter("PollCount").await.unwrap(), 7);

        let data = store.dump().await.unwrap();
        memory_store().await.load(&data).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_snapshot_never_mixes_batches() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("metrics.db").display());
        let store = Arc::new(SqliteStore::connect(&url).await.unwrap());

        // Batch k leaves counter `n` and gauge `g` both equal to k.
        let writer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                for k in 1..=50 {
                    let batch = [
                        MetricRecord::counter("n", 1),
                        MetricRecord::gauge("g", k as f64),
                    ];
                    store.bulk_apply(&batch).await.unwrap();
                }
            })
        };

        while !writer.is_finished() {
            let snapshot = store.snapshot().await.unwrap();
            let n = snapshot.counters.get("n").copied();
            let g = snapshot.gauges.get("g").map(|v| *v as i64);
            assert_eq!(n, g);
        }
        writer.await.unwrap();

        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot.counters["n"], 50);
        assert_eq!(snapshot.gauges["g"], 50.0);
    }

    #[tokio::test]
    async fn test_dump_load_roundtrip() {
        let store = memory_store().await;
        store.update_gauge("Alloc", 1024.0).await.unwrap();
        store.increment_counter("PollCount", 9).await.unwrap();
        let data = store.dump().await.unwrap();

        let other = memory_store().await;
        other.increment_counter("PollCount", 100).await.unwrap();
        other.update_gauge("stale", 1.0).await.unwrap();
        other.load(&data).await.unwrap();

        assert_eq!(other.snapshot().await.unwrap(), store.snapshot().await.unwrap());
        assert_eq!(other.get_counter("PollCount").await.unwrap(), 9);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("metrics.db").display());
        let store = Arc::new(SqliteStore::connect(&url).await.unwrap());

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    store.increment_counter("hits", 2).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get_counter("hits").await.unwrap(), 200);
    }

    #[tokio::test]
    async fn test_ping() {
        let store = memory_store().await;
        store.ping().await.unwrap();
        store.close().await.unwrap();
        assert!(store.ping().await.is_err());
    }
}
