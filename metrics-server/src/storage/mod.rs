//! Storage layer for the collector.
//!
//! Every backend implements [`MetricStore`]:
//!
//! - [`MemoryStore`]: two maps behind independent locks, optionally dumped to a
//!   JSON file synchronously or on a timer.
//! - [`SqliteStore`]: two tables with atomic upserts, batches applied in one
//!   transaction.
//! - [`ResilientStore`]: wraps a relational backend that may be unreachable,
//!   binding to it lazily and degrading to no-ops until it is.
//!
//! # Batch semantics
//!
//! Records with an unknown kind, a missing value/delta or an empty id are
//! skipped individually by every backend. What differs is failure behavior:
//! the memory store cannot fail mid-batch, the relational store rolls the
//! whole batch back if any statement fails.

mod memory;
mod relational;
mod resilient;
pub mod retry;

pub use memory::{MemoryStore, MemoryStoreConfig, PersistMode};
pub use relational::SqliteStore;
pub use resilient::{BackendConnector, ResilientStore, SqliteConnector};

use async_trait::async_trait;
use metrics_model::{MetricRecord, Snapshot};
use serde::Serialize;

use crate::{Error, Result};

/// A gauge as returned by list reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GaugeItem {
    pub name: String,
    pub value: f64,
}

/// A counter as returned by list reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterItem {
    pub name: String,
    pub value: i64,
}

impl GaugeItem {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

impl CounterItem {
    pub fn new(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Storage contract shared by all backends.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Current value of a gauge, `Error::NotFound` if absent.
    async fn get_gauge(&self, name: &str) -> Result<f64>;

    /// Current value of a counter, `Error::NotFound` if absent.
    async fn get_counter(&self, name: &str) -> Result<i64>;

    /// All gauges, sorted by name.
    async fn list_gauges(&self) -> Result<Vec<GaugeItem>>;

    /// All counters, sorted by name.
    async fn list_counters(&self) -> Result<Vec<CounterItem>>;

    /// Replace a gauge value.
    async fn update_gauge(&self, name: &str, value: f64) -> Result<()>;

    /// Add `delta` to a counter, creating it at zero first if absent.
    async fn increment_counter(&self, name: &str, delta: i64) -> Result<()>;

    /// Apply a batch of records. Invalid records are skipped.
    async fn bulk_apply(&self, records: &[MetricRecord]) -> Result<()>;

    /// Capture every gauge and counter.
    async fn snapshot(&self) -> Result<Snapshot>;

    /// Serialized [`Snapshot`].
    async fn dump(&self) -> Result<Vec<u8>> {
        Ok(self.snapshot().await?.to_json()?)
    }

    /// Replace the current state with a serialized [`Snapshot`].
    async fn load(&self, data: &[u8]) -> Result<()>;

    /// Whether the backing resource is reachable.
    async fn ping(&self) -> Result<()>;

    /// Flush and release backing resources.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Gauges must be finite; NaN and infinities have no JSON form.
fn ensure_finite(name: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "gauge {} has non-finite value {}",
            name, value
        )))
    }
}

fn sort_gauges(mut items: Vec<GaugeItem>) -> Vec<GaugeItem> {
    items.sort_by(|a, b| a.name.cmp(&b.name));
    items
}

fn sort_counters(mut items: Vec<CounterItem>) -> Vec<CounterItem> {
    items.sort_by(|a, b| a.name.cmp(&b.name));
    items
}
