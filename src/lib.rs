pub mod classify;
pub mod config;
pub mod error;
pub mod executor;
pub mod inspector;
pub mod records;
pub mod storage;
pub mod toolchain;

pub use error::{Error, Result};
pub use inspector::{BuildInspector, BuildParams, ConfigureParams, InspectorState};
pub use records::{
    BuildRecord, BuildStatistics, BuildTarget, ConfigurationRecord, Diagnostic, DiagnosticKind,
    TargetType, UNKNOWN,
};
pub use storage::{BuildStore, DatabaseError, StoreConfig};
