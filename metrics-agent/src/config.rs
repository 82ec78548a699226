//! Agent configuration from command-line flags and environment variables.

use std::fmt;
use std::time::Duration;

use clap::Parser;
use url::Url;

use crate::error::{Error, Result};
use crate::reporter::{ReporterConfig, RetryPolicy};

#[derive(Debug, Clone, Parser)]
#[command(name = "metrics-agent", version, about = "Metrics collection agent")]
pub struct AgentConfig {
    /// Server address, `host:port` or a full URL
    #[arg(short = 'a', long, env = "ADDRESS", default_value = "localhost:8080")]
    pub address: String,

    /// Shared signing key
    #[arg(short = 'k', long, env = "KEY")]
    pub key: Option<String>,

    /// Seconds between samples
    #[arg(
        short = 'p',
        long,
        env = "POLL_INTERVAL",
        default_value_t = 2,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub poll_interval: u64,

    /// Seconds between reports
    #[arg(
        short = 'r',
        long,
        env = "REPORT_INTERVAL",
        default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub report_interval: u64,

    /// Maximum concurrent requests to the server
    #[arg(
        short = 'l',
        long,
        env = "RATE_LIMIT",
        default_value_t = 1,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub rate_limit: u64,
}

impl AgentConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval)
    }

    /// URL of the batch endpoint.
    pub fn endpoint(&self) -> Result<Url> {
        let address = self.address.trim().trim_end_matches('/');
        let base = if address.contains("://") {
            format!("{}/", address)
        } else {
            format!("http://{}/", address)
        };
        Url::parse(&base)
            .and_then(|url| url.join("updates/"))
            .map_err(|e| Error::config(format!("invalid server address '{}': {}", self.address, e)))
    }

    pub fn reporter(&self) -> Result<ReporterConfig> {
        let rate_limit = usize::try_from(self.rate_limit)
            .map_err(|_| Error::config("rate limit out of range"))?;
        Ok(ReporterConfig {
            endpoint: self.endpoint()?,
            key: self.key.clone(),
            rate_limit,
            timeout: self.report_interval(),
            retry: RetryPolicy::default(),
        })
    }
}

impl fmt::Display for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "address={} poll_interval={}s report_interval={}s rate_limit={} key={}",
            self.address,
            self.poll_interval,
            self.report_interval,
            self.rate_limit,
            if self.key.as_deref().is_some_and(|k| !k.is_empty()) {
                "[REDACTED]"
            } else {
                "unset"
            },
        )
    }
}
