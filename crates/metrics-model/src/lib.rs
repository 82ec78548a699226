//! # Metrics Model
//!
//! Wire-level types shared by the metrics agent and the collector service.
//!
//! ## Features
//!
//! - `MetricRecord`, the single JSON unit accepted by the update endpoints
//! - `Snapshot`, a point-in-time copy of all gauges and counters
//! - gzip helpers for request and response bodies
//! - body signing with a shared key (`HashSHA256` header)
//!

pub mod codec;
mod error;
pub mod record;
pub mod sign;
mod snapshot;

pub use error::{Error, Result};
pub use record::{MetricRecord, MetricType, MetricUpdate};
pub use snapshot::Snapshot;

/// Metric id used for the agent-owned sample counter.
pub const POLL_COUNT: &str = "PollCount";

/// Metric id used for the random liveness gauge.
pub const RANDOM_VALUE: &str = "RandomValue";
