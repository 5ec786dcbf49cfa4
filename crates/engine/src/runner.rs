//! Profile runner: executes every module of a level, one at a time.

use crate::cancel::CancellationToken;
use crate::catalog::{Module, ModuleCatalog};
use crate::events::{ProgressSink, RunEvent};
use crate::executor::{ExecutionOutcome, Executor};
use crate::ledger::RollbackLedger;
use crate::lock::HostLock;
use crate::platform::ModuleRequest;
use crate::summary::summarize;
use chrono::Utc;
use hardkit_common::{Error, Platform, Result};
use hardkit_schema::{
    AuditEntry, AuditLog, ExecutionMode, Level, ProcessStatus, ProfileRun, ResultRecord, RunStatus,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Runs profiles for one platform.
///
/// Modules run sequentially in catalog order. A failing module never stops
/// the run; only cancellation does, and it is checked between modules.
pub struct ProfileRunner {
    platform: Platform,
    catalog: Arc<ModuleCatalog>,
    executor: Arc<dyn Executor>,
    ledger: RollbackLedger,
    lock_path: PathBuf,
}

impl ProfileRunner {
    pub fn new(
        platform: Platform,
        catalog: Arc<ModuleCatalog>,
        executor: Arc<dyn Executor>,
        ledger: RollbackLedger,
        lock_path: PathBuf,
    ) -> Self {
        Self {
            platform,
            catalog,
            executor,
            ledger,
            lock_path,
        }
    }

    /// Run every module of `level` in `mode`, holding the host lock throughout.
    pub async fn run(
        &self,
        level: Level,
        mode: ExecutionMode,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<ProfileRun> {
        if mode == ExecutionMode::Rollback {
            return Err(Error::InvalidMode(
                "Rollback runs one ledger entry, not a profile".to_string(),
            ));
        }
        self.catalog.ensure_supported(self.platform)?;

        let modules = self.catalog.resolve(self.platform, level);
        let mut run = ProfileRun::new(
            self.platform,
            level,
            mode,
            modules.iter().map(|m| m.name.clone()).collect(),
        );
        let _lock = HostLock::acquire(&self.lock_path, &run.id)?;

        let total = modules.len();
        info!(
            "Starting {} run {} at {} on {} ({} modules)",
            mode, run.id, level, self.platform, total
        );
        sink.emit(RunEvent::RunStarted {
            run_id: run.id.clone(),
            mode,
            level,
            total,
        })
        .await;

        let mut audit = AuditLog::new();
        let mut cancelled = false;
        let mut any_failed = false;

        for (index, module) in modules.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Run {} cancelled before {}", run.id, module.name);
                cancelled = true;
                break;
            }

            sink.emit(RunEvent::ModuleStarted {
                index: index + 1,
                total,
                module: module.name.clone(),
            })
            .await;
            info!("[{}/{}] {} {}", index + 1, total, mode, module.name);

            let request = ModuleRequest::new(module, mode, level);
            let outcome = match self.executor.execute(&request, cancel, sink).await {
                Ok(outcome) => outcome,
                Err(e) => invocation_failure(module, &e, sink).await,
            };

            if mode == ExecutionMode::Harden {
                self.capture(module, &outcome.records);
            }

            audit.add(AuditEntry::new(
                0,
                module.name.clone(),
                mode,
                Some(level),
                outcome.program.clone(),
                outcome.args.clone(),
                outcome.started_at,
                outcome.completed_at,
                outcome.status,
                outcome.records.len(),
                outcome.stderr.len() as u64,
            ));

            sink.emit(RunEvent::ModuleFinished {
                module: module.name.clone(),
                status: outcome.status,
            })
            .await;

            run.records.extend(outcome.records);
            match outcome.status {
                ProcessStatus::Cancelled => {
                    cancelled = true;
                    break;
                }
                status if !status.is_success() => any_failed = true,
                _ => {}
            }
        }

        // The token may fire while the last module is exiting.
        if cancel.is_cancelled() {
            cancelled = true;
        }

        run.status = if cancelled {
            RunStatus::Cancelled
        } else if any_failed {
            RunStatus::CompletedWithErrors
        } else {
            RunStatus::Completed
        };
        run.audit = audit.into_entries();
        run.completed_at = Some(Utc::now());

        let summary = summarize(&run.records);
        info!(
            "Run {} {}: {} records, {} compliant, {} not compliant, {} errors",
            run.id, run.status, summary.total, summary.compliant, summary.not_compliant, summary.errors
        );
        sink.emit(RunEvent::RunFinished {
            run_id: run.id.clone(),
            status: run.status,
            summary,
        })
        .await;

        Ok(run)
    }

    fn capture(&self, module: &Module, records: &[ResultRecord]) {
        for record in records.iter().filter(|r| r.value.is_some()) {
            if let Err(e) = self.ledger.capture(module, record) {
                warn!(
                    "Failed to capture rollback entry for {} ({}): {}",
                    module.name, record.parameter, e
                );
            }
        }
    }
}

/// An invocation failure ends up in the record stream like any module fault.
async fn invocation_failure(
    module: &Module,
    error: &Error,
    sink: &dyn ProgressSink,
) -> ExecutionOutcome {
    warn!("Could not invoke {}: {}", module.name, error);
    let now = Utc::now();
    let record = ResultRecord::invocation_failed(&module.name, &error.to_string());
    sink.emit(RunEvent::Record {
        module: module.name.clone(),
        record: record.clone(),
    })
    .await;

    ExecutionOutcome {
        records: vec![record],
        status: ProcessStatus::InvocationFailed,
        program: module.path.to_string_lossy().to_string(),
        args: Vec::new(),
        stderr: String::new(),
        started_at: now,
        completed_at: now,
    }
}
