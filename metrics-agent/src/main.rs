use std::sync::Arc;

use clap::Parser;
use metrics_agent::collector::{run_host_collector, run_runtime_collector};
use metrics_agent::config::AgentConfig;
use metrics_agent::reporter::Reporter;
use metrics_agent::state::AgentState;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables before flags fall back to them
    dotenvy::dotenv().ok();
    let config = AgentConfig::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "metrics_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting metrics-agent: {}", config);

    let state = Arc::new(AgentState::new());
    let reporter = Reporter::new(config.reporter()?, Arc::clone(&state))?;
    let cancel = CancellationToken::new();

    let runtime = tokio::spawn(run_runtime_collector(
        Arc::clone(&state),
        config.poll_interval(),
        cancel.child_token(),
    ));
    let host = tokio::spawn(run_host_collector(
        Arc::clone(&state),
        config.poll_interval(),
        cancel.child_token(),
    ));
    let reporting = tokio::spawn(reporter.run(config.report_interval(), cancel.child_token()));

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C, shutting down");
    }
    info!("Shutdown signal received");
    cancel.cancel();

    let tasks = [
        ("runtime collector", runtime),
        ("host collector", host),
        ("reporter", reporting),
    ];
    for (name, task) in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "{} task failed", name);
        }
    }

    info!("metrics-agent stopped");
    Ok(())
}
