//! SQLite persistence for configure and build records
//!
//! The database file is the contract read by external dashboards, so schema
//! changes are additive only. Each [`BuildStore`] owns its own connection;
//! concurrent writers in other processes are serialised by SQLite and retried
//! here with bounded exponential backoff.

mod schema;
mod store;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use schema::SCHEMA_VERSION;
pub use store::BuildStore;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Lock contention outlasted every retry
    #[error("database still locked after {attempts} attempts: {source}")]
    Busy {
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type DbResult<T> = std::result::Result<T, DatabaseError>;

/// Store tuning, the `[store]` table of the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite busy handler timeout per statement
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Retries of a whole write transaction after it reports busy/locked
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay, doubled on each retry
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    50
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}
