//! Classification of build tool output into diagnostics
//!
//! The dialect table lives in [`dialect`]; [`classifier`] walks it for each line.
//! Classification is a pure function over a read-only table, so stdout and
//! stderr readers call it concurrently without coordination.

pub mod classifier;
pub mod dialect;

pub use classifier::{classify, dedup, strip_ansi};
pub use dialect::Dialect;
