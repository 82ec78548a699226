//! Store wrapper that tolerates an unreachable backend.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics_model::{MetricRecord, Snapshot};
use parking_lot::{Mutex, RwLock};
use sqlx::ConnectOptions;
use sqlx::Connection;
use sqlx::sqlite::SqliteConnectOptions;
use tracing::{debug, info, warn};

use super::{CounterItem, GaugeItem, MetricStore, SqliteStore};
use crate::{Error, Result};

/// Source of the real store behind a [`ResilientStore`].
#[async_trait]
pub trait BackendConnector: Send + Sync {
    /// Cheap reachability check.
    async fn probe(&self) -> bool;

    /// Build the real store.
    async fn connect(&self) -> Result<Arc<dyn MetricStore>>;
}

/// Connector for a SQLite database URL.
pub struct SqliteConnector {
    dsn: String,
}

impl SqliteConnector {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self { dsn: dsn.into() }
    }
}

#[async_trait]
impl BackendConnector for SqliteConnector {
    async fn probe(&self) -> bool {
        let options = match SqliteConnectOptions::from_str(&self.dsn) {
            Ok(options) => options.create_if_missing(true),
            Err(e) => {
                debug!(error = %e, "Invalid database URL");
                return false;
            }
        };

        match options.connect().await {
            Ok(conn) => {
                if let Err(e) = conn.close().await {
                    debug!(error = %e, "Closing probe connection failed");
                }
                true
            }
            Err(e) => {
                debug!(error = %e, "Database probe failed");
                false
            }
        }
    }

    async fn connect(&self) -> Result<Arc<dyn MetricStore>> {
        let store = SqliteStore::connect(&self.dsn).await?;
        Ok(Arc::new(store))
    }
}

/// Lazily binds to the store produced by a [`BackendConnector`].
///
/// While unbound, reads report `NotFound` or empty lists and writes are
/// dropped. Every call re-probes unless `probe_cooldown` is non-zero, in which
/// case an unreachable verdict is reused for that long. Once bound the
/// wrapper stays bound.
pub struct ResilientStore {
    connector: Box<dyn BackendConnector>,
    delegate: RwLock<Option<Arc<dyn MetricStore>>>,
    bind_lock: tokio::sync::Mutex<()>,
    probe_cooldown: Duration,
    last_unreachable: Mutex<Option<Instant>>,
}

impl ResilientStore {
    pub fn new(connector: impl BackendConnector + 'static) -> Self {
        Self {
            connector: Box::new(connector),
            delegate: RwLock::new(None),
            bind_lock: tokio::sync::Mutex::new(()),
            probe_cooldown: Duration::ZERO,
            last_unreachable: Mutex::new(None),
        }
    }

    pub fn with_probe_cooldown(mut self, cooldown: Duration) -> Self {
        self.probe_cooldown = cooldown;
        self
    }

    pub fn is_bound(&self) -> bool {
        self.delegate.read().is_some()
    }

    fn current(&self) -> Option<Arc<dyn MetricStore>> {
        self.delegate.read().clone()
    }

    fn cooling_down(&self) -> bool {
        if self.probe_cooldown.is_zero() {
            return false;
        }
        self.last_unreachable
            .lock()
            .is_some_and(|at| at.elapsed() < self.probe_cooldown)
    }

    fn mark_unreachable(&self) {
        *self.last_unreachable.lock() = Some(Instant::now());
    }

    /// The bound store, binding it first if the backend has become reachable.
    async fn resolve(&self) -> Option<Arc<dyn MetricStore>> {
        if let Some(store) = self.current() {
            return Some(store);
        }

        let _guard = self.bind_lock.lock().await;
        if let Some(store) = self.current() {
            return Some(store);
        }
        if self.cooling_down() {
            return None;
        }

        if !self.connector.probe().await {
            debug!("Storage backend unreachable");
            self.mark_unreachable();
            return None;
        }

        match self.connector.connect().await {
            Ok(store) => {
                *self.delegate.write() = Some(Arc::clone(&store));
                info!("Storage backend bound");
                Some(store)
            }
            Err(e) => {
                warn!(error = %e, "Storage backend reachable but failed to initialize");
                self.mark_unreachable();
                None
            }
        }
    }
}

#[async_trait]
impl MetricStore for ResilientStore {
    async fn get_gauge(&self, name: &str) -> Result<f64> {
        match self.resolve().await {
            Some(store) => store.get_gauge(name).await,
            None => Err(Error::not_found("gauge", name)),
        }
    }

    async fn get_counter(&self, name: &str) -> Result<i64> {
        match self.resolve().await {
            Some(store) => store.get_counter(name).await,
            None => Err(Error::not_found("counter", name)),
        }
    }

    async fn list_gauges(&self) -> Result<Vec<GaugeItem>> {
        match self.resolve().await {
            Some(store) => store.list_gauges().await,
            None => Ok(Vec::new()),
        }
    }

    async fn list_counters(&self) -> Result<Vec<CounterItem>> {
        match self.resolve().await {
            Some(store) => store.list_counters().await,
            None => Ok(Vec::new()),
        }
    }

    async fn update_gauge(&self, name: &str, value: f64) -> Result<()> {
        match self.resolve().await {
            Some(store) => store.update_gauge(name, value).await,
            None => {
                debug!(metric = %name, "Dropping gauge update, backend unavailable");
                Ok(())
            }
        }
    }

    async fn increment_counter(&self, name: &str, delta: i64) -> Result<()> {
        match self.resolve().await {
            Some(store) => store.increment_counter(name, delta).await,
            None => {
                debug!(metric = %name, "Dropping counter update, backend unavailable");
                Ok(())
            }
        }
    }

    async fn bulk_apply(&self, records: &[MetricRecord]) -> Result<()> {
        match self.resolve().await {
            Some(store) => store.bulk_apply(records).await,
            None => {
                debug!(count = records.len(), "Dropping batch, backend unavailable");
                Ok(())
            }
        }
    }

    async fn snapshot(&self) -> Result<Snapshot> {
        match self.resolve().await {
            Some(store) => store.snapshot().await,
            None => Ok(Snapshot::default()),
        }
    }

    async fn load(&self, data: &[u8]) -> Result<()> {
        match self.resolve().await {
            Some(store) => store.load(data).await,
            None => Ok(()),
        }
    }

    async fn ping(&self) -> Result<()> {
        match self.resolve().await {
            Some(store) => store.ping().await,
            None => Err(Error::Other("storage backend unreachable".to_string())),
        }
    }

    async fn close(&self) -> Result<()> {
        match self.current() {
            Some(store) => store.close().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct FakeConnector {
        reachable: Arc<AtomicBool>,
        fail_connect: Arc<AtomicBool>,
        probes: Arc<AtomicUsize>,
        connects: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BackendConnector for FakeConnector {
        async fn probe(&self) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.reachable.load(Ordering::SeqCst)
        }

        async fn connect(&self) -> Result<Arc<dyn MetricStore>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(Error::Other("connect failed".to_string()));
            }
            Ok(Arc::new(MemoryStore::new()))
        }
    }

    #[tokio::test]
    async fn test_unreachable_backend_degrades() {
        let connector = FakeConnector::default();
        let store = ResilientStore::new(connector.clone());

        store.update_gauge("Temp", 1.0).await.unwrap();
        store.increment_counter("PollCount", 1).await.unwrap();
        store
            .bulk_apply(&[MetricRecord::counter("qwe", 3)])
            .await
            .unwrap();

        assert!(store.get_gauge("Temp").await.unwrap_err().is_not_found());
        assert!(store.get_counter("PollCount").await.unwrap_err().is_not_found());
        assert!(store.list_gauges().await.unwrap().is_empty());
        assert!(store.list_counters().await.unwrap().is_empty());
        assert!(store.snapshot().await.unwrap().is_empty());
        assert!(store.ping().await.is_err());
        assert!(!store.is_bound());
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
        // One probe per call.
        assert_eq!(connector.probes.load(Ordering::SeqCst), 9);
    }

    #[tokio::test]
    async fn test_binds_once_reachable() {
        let connector = FakeConnector::default();
        let store = ResilientStore::new(connector.clone());

        store.increment_counter("PollCount", 1).await.unwrap();
        connector.reachable.store(true, Ordering::SeqCst);

        store.increment_counter("PollCount", 2).await.unwrap();
        assert!(store.is_bound());
        assert_eq!(store.get_counter("PollCount").await.unwrap(), 2);

        // Stays bound even if the probe would now fail.
        connector.reachable.store(false, Ordering::SeqCst);
        store.update_gauge("Temp", 2.5).await.unwrap();
        assert_eq!(store.get_gauge("Temp").await.unwrap(), 2.5);
        store.ping().await.unwrap();

        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert_eq!(connector.probes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_connect_counts_as_unreachable() {
        let connector = FakeConnector::default();
        connector.reachable.store(true, Ordering::SeqCst);
        connector.fail_connect.store(true, Ordering::SeqCst);
        let store = ResilientStore::new(connector.clone());

        store.update_gauge("Temp", 1.0).await.unwrap();
        assert!(!store.is_bound());

        connector.fail_connect.store(false, Ordering::SeqCst);
        store.update_gauge("Temp", 3.0).await.unwrap();
        assert!(store.is_bound());
        assert_eq!(store.get_gauge("Temp").await.unwrap(), 3.0);
    }

    #[tokio::test]
    async fn test_probe_cooldown_caches_unreachable_verdict() {
        let connector = FakeConnector::default();
        let store =
            ResilientStore::new(connector.clone()).with_probe_cooldown(Duration::from_secs(60));

        for _ in 0..5 {
            store.increment_counter("PollCount", 1).await.unwrap();
        }
        assert_eq!(connector.probes.load(Ordering::SeqCst), 1);

        // Still inside the window: reachable backend is not noticed yet.
        connector.reachable.store(true, Ordering::SeqCst);
        store.increment_counter("PollCount", 1).await.unwrap();
        assert!(!store.is_bound());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_bind_once() {
        let connector = FakeConnector::default();
        connector.reachable.store(true, Ordering::SeqCst);
        let store = Arc::new(ResilientStore::new(connector.clone()));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.increment_counter("hits", 1).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert_eq!(store.get_counter("hits").await.unwrap(), 16);
    }

    #[tokio::test]
    async fn test_sqlite_connector() {
        let dir = tempfile::tempdir().unwrap();
        let missing = format!("sqlite:{}", dir.path().join("nope/metrics.db").display());
        assert!(!SqliteConnector::new(missing).probe().await);

        let url = format!("sqlite:{}", dir.path().join("metrics.db").display());
        let store = ResilientStore::new(SqliteConnector::new(url));
        store.increment_counter("PollCount", 4).await.unwrap();
        assert!(store.is_bound());
        assert_eq!(store.get_counter("PollCount").await.unwrap(), 4);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_sqlite_probe_releases_its_connection() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("metrics.db").display());
        let connector = SqliteConnector::new(url.clone());
        for _ in 0..3 {
            assert!(connector.probe().await);
        }

        // The probe left no open handle behind, so the store can migrate.
        let store = SqliteStore::connect(&url).await.unwrap();
        store.ping().await.unwrap();
        store.close().await.unwrap();
    }
}
