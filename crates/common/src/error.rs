//! Common error types for hardkit.
//!
//! Only faults that make a call fail outright live here. Faults raised by a
//! module while it runs (missing binary, non-zero exit, malformed output,
//! cancellation, timeout) are absorbed into the result stream as synthesized
//! records and never surface as an `Error`.

use std::path::PathBuf;
use thiserror::Error;

/// Common error type for hardkit operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Invalid level: {0} (expected L1, L2 or L3)")]
    InvalidLevel(String),

    #[error("Invalid mode: {0} (expected audit, harden or rollback)")]
    InvalidMode(String),

    #[error("Invalid ledger name: {0}")]
    InvalidLedgerName(String),

    #[error("Invalid ledger entry {file}: {reason}")]
    InvalidLedgerEntry { file: String, reason: String },

    #[error("No {platform} module matches ledger module name: {module}")]
    UnknownModule { module: String, platform: String },

    #[error("A run is already in progress on this host (lock held at {lock_path:?}: {holder})")]
    RunInProgress { lock_path: PathBuf, holder: String },

    #[error("Module is not executable: {0:?}")]
    ModuleNotExecutable(PathBuf),

    #[error("Failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema validation failed: {0}")]
    SchemaValidation(String),

    #[error("Report error: {0}")]
    Report(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias using common Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the error rejects a run because another one holds the host lock.
    pub fn is_run_in_progress(&self) -> bool {
        matches!(self, Error::RunInProgress { .. })
    }
}
