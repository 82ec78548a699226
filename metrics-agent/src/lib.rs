//! # Metrics Agent
//!
//! Samples process and host statistics on one schedule and reports them to
//! the metrics server on another.
//!
//! - [`collector`]: periodic samplers writing into [`state::AgentState`]
//! - [`reporter`]: drains the state into gzip-compressed, optionally signed
//!   batches and delivers them with bounded concurrency and retries

pub mod collector;
pub mod config;
pub mod error;
pub mod reporter;
pub mod state;
pub mod stats;

pub use error::{Error, Result};
