//! Profile runs and per-module process outcomes.

use crate::audit::AuditEntry;
use crate::level::{ExecutionMode, Level};
use crate::record::ResultRecord;
use chrono::{DateTime, Utc};
use hardkit_common::Platform;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a module's process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessStatus {
    /// The process exited with a code.
    Exited { code: i32 },
    /// The process ended without an exit code (killed by a signal).
    Terminated,
    /// The module file does not exist; nothing was spawned.
    NotFound,
    /// The run was cancelled and the process killed.
    Cancelled,
    /// The process exceeded the module time limit and was killed.
    TimedOut,
    /// The process could not be started.
    InvocationFailed,
}

impl ProcessStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessStatus::Exited { code: 0 })
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Exited { code } => write!(f, "exit {}", code),
            ProcessStatus::Terminated => write!(f, "terminated"),
            ProcessStatus::NotFound => write!(f, "not found"),
            ProcessStatus::Cancelled => write!(f, "cancelled"),
            ProcessStatus::TimedOut => write!(f, "timed out"),
            ProcessStatus::InvocationFailed => write!(f, "invocation failed"),
        }
    }
}

/// Final state of a profile run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every module ran and exited zero.
    Completed,
    /// Every module was attempted, but at least one failed, was missing or timed out.
    CompletedWithErrors,
    /// The caller cancelled the run before all modules finished.
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::CompletedWithErrors => write!(f, "completed with errors"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A full orchestrated run over a resolved module list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRun {
    pub id: String,
    pub platform: Platform,
    pub level: Level,
    pub mode: ExecutionMode,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Module names in execution order.
    pub modules: Vec<String>,
    /// Records in module execution order, then emission order.
    pub records: Vec<ResultRecord>,
    pub status: RunStatus,
    pub audit: Vec<AuditEntry>,
}

impl ProfileRun {
    pub fn new(platform: Platform, level: Level, mode: ExecutionMode, modules: Vec<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            platform,
            level,
            mode,
            started_at: Utc::now(),
            completed_at: None,
            modules,
            records: Vec::new(),
            status: RunStatus::Completed,
            audit: Vec::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == RunStatus::Cancelled
    }
}
