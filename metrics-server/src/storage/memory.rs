//! In-memory metric store with optional file persistence.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics_model::{MetricRecord, MetricUpdate, Snapshot};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{CounterItem, GaugeItem, MetricStore, sort_counters, sort_gauges};
use crate::{Error, Result};

/// When the store writes its snapshot file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistMode {
    /// No snapshot file.
    Disabled,
    /// Dump after every mutating call.
    Synchronous,
    /// Dump from a background task every period.
    Periodic(Duration),
}

/// Memory store configuration.
#[derive(Debug, Clone, Default)]
pub struct MemoryStoreConfig {
    /// Snapshot file. `None` disables persistence.
    pub file_path: Option<PathBuf>,
    /// Dump period; zero means synchronous dumps.
    pub store_interval: Duration,
    /// Load the snapshot file when the store is opened.
    pub restore: bool,
}

impl MemoryStoreConfig {
    pub fn mode(&self) -> PersistMode {
        match &self.file_path {
            None => PersistMode::Disabled,
            Some(_) if self.store_interval.is_zero() => PersistMode::Synchronous,
            Some(_) => PersistMode::Periodic(self.store_interval),
        }
    }
}

/// Concurrent map-backed store.
///
/// Gauges and counters are guarded by independent locks so traffic on one
/// kind never waits on the other. Whenever both are needed they are taken
/// counters first, then gauges.
pub struct MemoryStore {
    gauges: RwLock<HashMap<String, f64>>,
    counters: RwLock<HashMap<String, i64>>,
    file_path: Option<PathBuf>,
    mode: PersistMode,
    /// Serializes snapshot file writers.
    file_lock: tokio::sync::Mutex<()>,
}

impl MemoryStore {
    /// Create an empty store without persistence.
    pub fn new() -> Self {
        Self::with_config(&MemoryStoreConfig::default())
    }

    fn with_config(config: &MemoryStoreConfig) -> Self {
        Self {
            gauges: RwLock::new(HashMap::new()),
            counters: RwLock::new(HashMap::new()),
            file_path: config.file_path.clone(),
            mode: config.mode(),
            file_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Create a store and, if configured, restore it from its snapshot file.
    ///
    /// A missing or unreadable snapshot is logged and the store starts empty.
    pub async fn open(config: MemoryStoreConfig) -> Self {
        let store = Self::with_config(&config);
        if config.restore {
            store.restore().await;
        }
        info!(mode = ?store.mode, path = ?store.file_path, "Memory store ready");
        store
    }

    pub fn mode(&self) -> PersistMode {
        self.mode
    }

    async fn restore(&self) {
        let Some(path) = &self.file_path else {
            return;
        };

        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No snapshot file to restore");
                return;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read snapshot file");
                return;
            }
        };

        match self.load(&data).await {
            Ok(()) => info!(path = %path.display(), "Restored metrics from snapshot"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to restore snapshot"),
        }
    }

    fn capture(&self) -> Snapshot {
        let counters = self.counters.read();
        let gauges = self.gauges.read();
        Snapshot {
            gauges: gauges.clone(),
            counters: counters.clone(),
        }
    }

    /// Write the current snapshot to the configured file.
    ///
    /// The file is replaced atomically: data goes to a temporary file in the
    /// same directory which is then renamed over the target.
    pub async fn persist(&self) -> Result<()> {
        let Some(path) = self.file_path.clone() else {
            return Ok(());
        };

        let _guard = self.file_lock.lock().await;
        let data = self.capture().to_json()?;
        tokio::task::spawn_blocking(move || write_atomic(&path, &data))
            .await
            .map_err(|e| Error::persistence(format!("Snapshot writer panicked: {}", e)))?
    }

    async fn after_write(&self) {
        if self.mode != PersistMode::Synchronous {
            return;
        }
        if let Err(e) = self.persist().await {
            warn!(error = %e, "Synchronous snapshot dump failed");
        }
    }

    /// Spawn the periodic dump task when the store runs in periodic mode.
    pub fn spawn_periodic_dump(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let PersistMode::Periodic(period) = self.mode else {
            return None;
        };

        let store = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Periodic snapshot task shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = store.persist().await {
                            warn!(error = %e, "Periodic snapshot dump failed");
                        }
                    }
                }
            }
        }))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn get_gauge(&self, name: &str) -> Result<f64> {
        self.gauges
            .read()
            .get(name)
            .copied()
            .ok_or_else(|| Error::not_found("gauge", name))
    }

    async fn get_counter(&self, name: &str) -> Result<i64> {
        self.counters
            .read()
            .get(name)
            .copied()
            .ok_or_else(|| Error::not_found("counter", name))
    }

    async fn list_gauges(&self) -> Result<Vec<GaugeItem>> {
        let items = self
            .gauges
            .read()
            .iter()
            .map(|(name, value)| GaugeItem::new(name.clone(), *value))
            .collect();
        Ok(sort_gauges(items))
    }

    async fn list_counters(&self) -> Result<Vec<CounterItem>> {
        let items = self
            .counters
            .read()
            .iter()
            .map(|(name, value)| CounterItem::new(name.clone(), *value))
            .collect();
        Ok(sort_counters(items))
    }

    async fn update_gauge(&self, name: &str, value: f64) -> Result<()> {
        super::ensure_finite(name, value)?;
        self.gauges.write().insert(name.to_string(), value);
        self.after_write().await;
        Ok(())
    }

    async fn increment_counter(&self, name: &str, delta: i64) -> Result<()> {
        {
            let mut counters = self.counters.write();
            let entry = counters.entry(name.to_string()).or_insert(0);
            *entry = entry.wrapping_add(delta);
        }
        self.after_write().await;
        Ok(())
    }

    async fn bulk_apply(&self, records: &[MetricRecord]) -> Result<()> {
        {
            let mut counters = self.counters.write();
            let mut gauges = self.gauges.write();
            for record in records {
                match record.update() {
                    Some(MetricUpdate::Gauge { id, value }) => {
                        gauges.insert(id.to_string(), value);
                    }
                    Some(MetricUpdate::Counter { id, delta }) => {
                        let entry = counters.entry(id.to_string()).or_insert(0);
                        *entry = entry.wrapping_add(delta);
                    }
                    None => {
                        debug!(metric = %record.id, kind = %record.mtype, "Skipping invalid record")
                    }
                }
            }
        }
        self.after_write().await;
        Ok(())
    }

    async fn snapshot(&self) -> Result<Snapshot> {
        Ok(self.capture())
    }

    async fn load(&self, data: &[u8]) -> Result<()> {
        let snapshot = Snapshot::from_json(data)?;
        let mut counters = self.counters.write();
        let mut gauges = self.gauges.write();
        *counters = snapshot.counters;
        *gauges = snapshot.gauges;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.mode == PersistMode::Disabled {
            return Ok(());
        }
        self.persist().await?;
        debug!("Final snapshot written");
        Ok(())
    }
}
