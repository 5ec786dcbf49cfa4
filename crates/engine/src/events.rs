//! Progress events and the sinks that receive them.

use crate::summary::ComplianceSummary;
use async_trait::async_trait;
use hardkit_schema::{ExecutionMode, Level, ProcessStatus, ResultRecord, RunStatus};
use serde::Serialize;
use tokio::sync::mpsc;

/// Something observable that happened during a run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        mode: ExecutionMode,
        level: Level,
        total: usize,
    },
    /// Emitted before a module is spawned. `index` is 1-based.
    ModuleStarted {
        index: usize,
        total: usize,
        module: String,
    },
    /// A record as soon as it was read from the module's output.
    Record {
        module: String,
        record: ResultRecord,
    },
    ModuleFinished {
        module: String,
        status: ProcessStatus,
    },
    RunFinished {
        run_id: String,
        status: RunStatus,
        summary: ComplianceSummary,
    },
}

/// Receives run events. Called from the run's own task, in event order.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, event: RunEvent);
}

/// Sink that drops every event.
pub struct NullSink;

#[async_trait]
impl ProgressSink for NullSink {
    async fn emit(&self, _event: RunEvent) {}
}

/// Sink wrapping a synchronous callback.
pub struct FnSink<F>(pub F);

#[async_trait]
impl<F> ProgressSink for FnSink<F>
where
    F: Fn(RunEvent) + Send + Sync,
{
    async fn emit(&self, event: RunEvent) {
        (self.0)(event)
    }
}

/// A bounded channel applies backpressure to the run when the consumer lags.
/// A closed receiver is ignored; the run carries on.
#[async_trait]
impl ProgressSink for mpsc::Sender<RunEvent> {
    async fn emit(&self, event: RunEvent) {
        let _ = self.send(event).await;
    }
}

#[async_trait]
impl ProgressSink for mpsc::UnboundedSender<RunEvent> {
    async fn emit(&self, event: RunEvent) {
        let _ = self.send(event);
    }
}
