//! Batched delivery of the agent state to the metrics server.
//!
//! Each report tick drains the working set and hands the batch to its own
//! delivery task, so a slow server never delays sampling or the next tick.
//! A delivery encodes the batch (JSON, then gzip), signs the compressed bytes
//! when a key is configured, and posts it with retries. Every attempt holds
//! one permit of the shared rate limiter and is bounded by the attempt
//! timeout; a timed-out attempt is retried like any other transport failure.
//! When all attempts fail, the batch's `PollCount` is added back to the
//! working set.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics_model::codec::{self, GZIP_ENCODING};
use metrics_model::sign::{self, SIGNATURE_HEADER};
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::state::{AgentState, Batch};

/// Delay schedule between delivery attempts: `base + step * n` after the
/// n-th failure, counting from zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            step: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self, failures: u32) -> Duration {
        self.base_delay + self.step * failures
    }
}

#[derive(Debug, Clone)]
pub struct ReporterConfig {
    /// Batch endpoint, e.g. `http://localhost:8080/updates/`
    pub endpoint: Url,
    pub key: Option<String>,
    /// Maximum concurrent delivery attempts
    pub rate_limit: usize,
    /// Upper bound for one delivery attempt
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

/// Sends batches to the server.
#[derive(Clone)]
pub struct Reporter {
    client: reqwest::Client,
    endpoint: Url,
    key: Option<Arc<str>>,
    limiter: Arc<Semaphore>,
    timeout: Duration,
    retry: RetryPolicy,
    state: Arc<AgentState>,
}

impl Reporter {
    pub fn new(config: ReporterConfig, state: Arc<AgentState>) -> Result<Self> {
        if config.rate_limit == 0 {
            return Err(Error::config("rate limit must be positive"));
        }
        if config.retry.max_attempts == 0 {
            return Err(Error::config("at least one delivery attempt is required"));
        }

        install_crypto_provider();
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint,
            key: config.key.filter(|k| !k.is_empty()).map(Arc::from),
            limiter: Arc::new(Semaphore::new(config.rate_limit)),
            timeout: config.timeout,
            retry: config.retry,
            state,
        })
    }

    /// Report every `interval` until cancelled, then wait for deliveries
    /// still in flight.
    pub async fn run(self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        let mut deliveries = JoinSet::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let batch = self.state.take_batch();
                    let reporter = self.clone();
                    deliveries.spawn(async move { reporter.deliver_batch(batch).await });
                }
            }
            while deliveries.try_join_next().is_some() {}
        }

        if !deliveries.is_empty() {
            info!(in_flight = deliveries.len(), "Waiting for in-flight deliveries");
        }
        while deliveries.join_next().await.is_some() {}
        debug!("Reporter stopped");
    }

    /// Deliver one batch, compensating its `PollCount` on terminal failure.
    pub async fn deliver_batch(&self, batch: Batch) -> Result<()> {
        match self.deliver(&batch).await {
            Ok(()) => {
                debug!(records = batch.records.len(), "Batch delivered");
                Ok(())
            }
            Err(e) => {
                error!(
                    error = %e,
                    poll_count = batch.poll_count,
                    "Batch delivery failed, compensating PollCount"
                );
                self.state.compensate(batch.poll_count);
                Err(e)
            }
        }
    }

    async fn deliver(&self, batch: &Batch) -> Result<()> {
        let body = Bytes::from(codec::encode_batch(&batch.records)?);
        let signature = self.key.as_deref().map(|key| sign::sign(&body, key));
        self.send_with_retry(body, signature.as_deref()).await
    }

    async fn send_with_retry(&self, body: Bytes, signature: Option<&str>) -> Result<()> {
        let mut failures = 0;
        loop {
            match self.send_once(body.clone(), signature).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    failures += 1;
                    if !e.is_retryable() || failures >= self.retry.max_attempts {
                        return Err(e);
                    }
                    let delay = self.retry.delay(failures - 1);
                    warn!(
                        error = %e,
                        attempt = failures,
                        max_attempts = self.retry.max_attempts,
                        "Delivery attempt failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One attempt, holding a rate-limit permit until the response is read.
    ///
    /// The timeout starts once the permit is granted.
    async fn send_once(&self, body: Bytes, signature: Option<&str>) -> Result<()> {
        let _permit = self.limiter.acquire().await.map_err(|_| Error::Limiter)?;

        tokio::time::timeout(self.timeout, self.post(body, signature))
            .await
            .map_err(|_| Error::Timeout(self.timeout))?
    }

    async fn post(&self, body: Bytes, signature: Option<&str>) -> Result<()> {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, GZIP_ENCODING)
            .body(body);
        if let Some(signature) = signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// reqwest is built without a bundled TLS provider.
fn install_crypto_provider() {
    // Fails only when a provider is already installed.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}
