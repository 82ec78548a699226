//! HTTP API of the collector service.
//!
//! Path and JSON update/read endpoints, the batch endpoint, a liveness probe
//! and an HTML index of all metrics.

pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState, build_router};
