//! Audit trail of every module invocation made during a run.

use crate::level::{ExecutionMode, Level};
use crate::run::ProcessStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique sequence number.
    pub seq: u64,
    /// Module name as declared in the catalog.
    pub module: String,
    pub mode: ExecutionMode,
    /// Absent for rollback invocations.
    pub level: Option<Level>,
    /// Program that was spawned (the module itself or its interpreter).
    pub program: String,
    /// Argument vector passed to the program.
    pub args: Vec<String>,
    /// When the invocation started.
    pub started_at: DateTime<Utc>,
    /// When the invocation completed.
    pub completed_at: DateTime<Utc>,
    /// Duration in milliseconds.
    pub duration_ms: u64,
    /// How the process ended.
    pub status: ProcessStatus,
    /// Whether the process exited zero.
    pub success: bool,
    /// Number of records the invocation contributed, synthesized ones included.
    pub records: usize,
    /// Size of stderr in bytes.
    pub stderr_bytes: u64,
}

impl AuditEntry {
    /// Create a new audit entry.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        seq: u64,
        module: String,
        mode: ExecutionMode,
        level: Option<Level>,
        program: String,
        args: Vec<String>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        status: ProcessStatus,
        records: usize,
        stderr_bytes: u64,
    ) -> Self {
        let duration = completed_at - started_at;
        let duration_ms = duration.num_milliseconds().max(0) as u64;

        Self {
            seq,
            module,
            mode,
            level,
            program,
            args,
            started_at,
            completed_at,
            duration_ms,
            status,
            success: status.is_success(),
            records,
            stderr_bytes,
        }
    }
}

/// Collection of audit entries (written as JSONL).
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
    next_seq: u64,
}

impl AuditLog {
    /// Create a new empty audit log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from entries that already carry sequence numbers.
    pub fn from_entries(entries: Vec<AuditEntry>) -> Self {
        let next_seq = entries.last().map(|e| e.seq + 1).unwrap_or(0);
        Self { entries, next_seq }
    }

    /// Add an entry to the audit log.
    pub fn add(&mut self, mut entry: AuditEntry) {
        entry.seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(entry);
    }

    /// Get all entries.
    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<AuditEntry> {
        self.entries
    }

    /// Convert to JSONL format.
    pub fn to_jsonl(&self) -> String {
        self.entries
            .iter()
            .filter_map(|e| serde_json::to_string(e).ok())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(module: &str, status: ProcessStatus) -> AuditEntry {
        let now = Utc::now();
        AuditEntry::new(
            0,
            module.to_string(),
            ExecutionMode::Audit,
            Some(Level::L1),
            "sh".to_string(),
            vec![format!("scripts/linux/{}", module), "Audit".to_string(), "L1".to_string()],
            now,
            now + chrono::Duration::milliseconds(250),
            status,
            3,
            0,
        )
    }

    #[test]
    fn test_audit_log_sequences_entries() {
        let mut log = AuditLog::new();
        log.add(entry("a.sh", ProcessStatus::Exited { code: 0 }));
        log.add(entry("b.sh", ProcessStatus::Exited { code: 2 }));

        let entries = log.entries();
        assert_eq!(entries[0].seq, 0);
        assert_eq!(entries[1].seq, 1);
        assert!(entries[0].success);
        assert!(!entries[1].success);
        assert_eq!(entries[0].duration_ms, 250);
    }

    #[test]
    fn test_audit_log_jsonl() {
        let mut log = AuditLog::new();
        log.add(entry("a.sh", ProcessStatus::NotFound));

        let jsonl = log.to_jsonl();
        let entries: Vec<AuditEntry> = jsonl
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        let mut parsed = AuditLog::from_entries(entries);
        assert_eq!(parsed.entries().len(), 1);
        assert_eq!(parsed.entries()[0].status, ProcessStatus::NotFound);

        parsed.add(entry("b.sh", ProcessStatus::Cancelled));
        assert_eq!(parsed.entries()[1].seq, 1);
    }
}
