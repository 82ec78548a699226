//! Periodic samplers feeding [`AgentState`].

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::state::AgentState;
use crate::stats::{HostSampler, RuntimeSampler};

/// Sample runtime statistics every `interval` until cancelled.
///
/// The sample is read before the working-set lock is taken; only the
/// assignment happens under it.
pub async fn run_runtime_collector(
    state: Arc<AgentState>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut sampler = RuntimeSampler::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Runtime collector shutting down");
                break;
            }
            _ = ticker.tick() => {
                let sample = sampler.sample();
                state.record_sample(sample.gauges(), rand::random::<f64>());
                trace!("Runtime sample recorded");
            }
        }
    }
}

/// Sample host memory and CPU utilization every `interval` until cancelled.
pub async fn run_host_collector(
    state: Arc<AgentState>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut sampler = HostSampler::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Host collector shutting down");
                break;
            }
            _ = ticker.tick() => {
                state.record_host(sampler.sample());
                trace!("Host sample recorded");
            }
        }
    }
}
