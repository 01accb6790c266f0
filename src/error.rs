//! Library error type

use thiserror::Error;

use crate::inspector::InspectorState;
use crate::records::{BuildRecord, ConfigurationRecord};
use crate::storage::DatabaseError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The build tool could not be started at all
    #[error("failed to start {program}: {source}")]
    ToolNotFound {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Configure exited non-zero; the record has already been persisted
    #[error("configuration failed with exit code {}", .0.exit_code)]
    ConfigurationFailed(Box<ConfigurationRecord>),

    /// Build exited non-zero or was interrupted; the record has already been persisted
    #[error("build failed with exit code {}", .0.exit_code)]
    BuildFailed(Box<BuildRecord>),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("cannot {to} while {from}")]
    InvalidTransition {
        from: InspectorState,
        to: &'static str,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Exit code the CLI should terminate with
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ConfigurationFailed(record) => non_zero(record.exit_code),
            Error::BuildFailed(record) => non_zero(record.exit_code),
            Error::ToolNotFound { .. } => 127,
            _ => 1,
        }
    }
}

fn non_zero(code: i32) -> i32 {
    if code == 0 {
        1
    } else {
        code
    }
}
