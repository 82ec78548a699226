//! Service configuration from command-line flags and environment variables.
//!
//! Every flag has an environment fallback; a `.env` file is loaded before
//! parsing so it can supply them too.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::api::ApiServerConfig;
use crate::storage::MemoryStoreConfig;

#[derive(Debug, Clone, Parser)]
#[command(name = "metrics-server", version, about = "Metrics collector service")]
pub struct ServerConfig {
    /// Listen address
    #[arg(short = 'a', long, env = "ADDRESS", default_value = "localhost:8080")]
    pub address: String,

    /// Seconds between snapshot dumps, 0 dumps after every write
    #[arg(short = 'i', long, env = "STORE_INTERVAL", default_value_t = 300)]
    pub store_interval: u64,

    /// Snapshot file, empty disables persistence
    #[arg(
        short = 'f',
        long,
        env = "FILE_STORAGE_PATH",
        default_value = "/tmp/metrics-db.json"
    )]
    pub file_storage_path: String,

    /// Load the snapshot file at startup
    #[arg(
        short = 'r',
        long,
        env = "RESTORE",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub restore: bool,

    /// SQLite database URL; selects the relational backend
    #[arg(short = 'd', long, env = "DATABASE_DSN")]
    pub database_dsn: Option<String>,

    /// Shared signing key
    #[arg(short = 'k', long, env = "KEY")]
    pub key: Option<String>,

    /// Seconds to reuse an "unreachable" verdict for the database
    #[arg(long, env = "PROBE_COOLDOWN", default_value_t = 0)]
    pub probe_cooldown: u64,

    /// Directory for daily-rolling log files
    #[arg(long, env = "LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

impl ServerConfig {
    /// Database URL, if a non-empty one was given.
    pub fn database_dsn(&self) -> Option<&str> {
        self.database_dsn.as_deref().filter(|dsn| !dsn.trim().is_empty())
    }

    pub fn memory_store(&self) -> MemoryStoreConfig {
        let path = self.file_storage_path.trim();
        MemoryStoreConfig {
            file_path: (!path.is_empty()).then(|| PathBuf::from(path)),
            store_interval: Duration::from_secs(self.store_interval),
            restore: self.restore,
        }
    }

    pub fn api_server(&self) -> ApiServerConfig {
        ApiServerConfig {
            address: self.address.clone(),
            ..Default::default()
        }
    }

    pub fn probe_cooldown(&self) -> Duration {
        Duration::from_secs(self.probe_cooldown)
    }
}

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "address={} store_interval={}s file_storage_path={:?} restore={} database={} key={}",
            self.address,
            self.store_interval,
            self.file_storage_path,
            self.restore,
            if self.database_dsn().is_some() { "set" } else { "unset" },
            if self.key.as_deref().is_some_and(|k| !k.is_empty()) {
                "[REDACTED]"
            } else {
                "unset"
            },
        )
    }
}
