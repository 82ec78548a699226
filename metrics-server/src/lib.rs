//! # Metrics Server
//!
//! Collector service for pushed gauges and counters.
//!
//! Metrics live behind the [`storage::MetricStore`] trait: an in-memory store
//! with optional snapshot file, or a SQLite store shielded by
//! [`storage::ResilientStore`] so the service keeps answering while the
//! database is unreachable.

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod storage;

pub use error::{Error, Result};
