//! Retry helpers for database operations.

use rand::random;
use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::{Error, Result};

const MAX_ATTEMPTS: usize = 4;
const BASE_DELAY_MS: u64 = 50;
const MAX_DELAY_MS: u64 = 2000;

/// Whether an error is worth another attempt: SQLite busy/locked or a
/// connection-level failure.
pub fn is_transient(err: &Error) -> bool {
    let Error::DatabaseSqlx(sqlx_err) = err else {
        return false;
    };

    match sqlx_err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(Cow::into_owned);
            if matches!(code.as_deref(), Some("5") | Some("6")) {
                return true;
            }
            let msg = db_err.message().to_ascii_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        other => {
            let msg = other.to_string().to_ascii_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
    }
}

fn backoff(attempt: usize) -> Duration {
    let exp_backoff_ms = BASE_DELAY_MS.saturating_mul(1u64 << attempt);
    let capped_ms = exp_backoff_ms.min(MAX_DELAY_MS);
    let jitter_ms = random::<u64>() % (capped_ms / 4 + 1);
    Duration::from_millis((capped_ms + jitter_ms).min(MAX_DELAY_MS))
}

/// Run `op`, retrying transient failures up to four attempts in total.
pub async fn retry_transient<T, F, Fut>(op_name: &'static str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0usize;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if !is_transient(&err) || attempt >= MAX_ATTEMPTS {
                    return Err(err);
                }

                let delay = backoff(attempt - 1);
                debug!(
                    "Transient database failure during {}, retrying in {:?} (attempt {}/{}): {}",
                    op_name, delay, attempt, MAX_ATTEMPTS, err
                );
                sleep(delay).await;
            }
        }
    }
}
