//! hardkit engine: module catalog, execution, rollback ledger and profile runs.

pub mod cancel;
pub mod catalog;
pub mod events;
pub mod executor;
pub mod ledger;
pub mod lock;
pub mod orchestrator;
pub mod platform;
pub mod protocol;
pub mod report;
pub mod runner;
pub mod summary;

pub use cancel::CancellationToken;
pub use catalog::{Module, ModuleCatalog};
pub use events::{FnSink, NullSink, ProgressSink, RunEvent};
pub use executor::{ExecutionOutcome, Executor, ExecutorConfig, ProcessExecutor};
pub use ledger::{CleanupPolicy, LedgerName, RollbackLedger, RollbackOutcome};
pub use lock::HostLock;
pub use orchestrator::{default_config, Orchestrator};
pub use report::{FileReportGenerator, ReportFormat, ReportGenerator, Severity};
pub use runner::ProfileRunner;
pub use summary::{summarize, ComplianceSummary};
