//! Data model for hardkit.
//!
//! This crate defines levels and modes, the result records modules emit,
//! catalog configuration, profile runs and their audit trail, plus the
//! embedded JSON schemas used to validate catalogs and rollback ledger entries.

pub mod audit;
pub mod catalog;
pub mod level;
pub mod record;
pub mod run;
pub mod schema;
pub mod validation;

pub use audit::{AuditEntry, AuditLog};
pub use catalog::{CatalogConfig, LevelTable};
pub use level::{ExecutionMode, Level};
pub use record::{ResultRecord, ResultStatus};
pub use run::{ProcessStatus, ProfileRun, RunStatus};
pub use validation::{validate_catalog, validate_ledger_entry};
