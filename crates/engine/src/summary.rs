//! Compliance summary over a finished run's records.

use hardkit_schema::{ResultRecord, ResultStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregate counts of record statuses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceSummary {
    pub total: usize,
    pub compliant: usize,
    pub not_compliant: usize,
    /// Everything that is neither Compliant nor NotCompliant.
    pub errors: usize,
    /// Count per status label, in label order.
    pub by_status: BTreeMap<String, usize>,
}

impl ComplianceSummary {
    /// Summarize records. Pure; statuses outside the recognized set count as errors.
    pub fn from_records(records: &[ResultRecord]) -> Self {
        let mut summary = Self {
            total: records.len(),
            ..Default::default()
        };

        for record in records {
            match record.status {
                ResultStatus::Compliant => summary.compliant += 1,
                ResultStatus::NotCompliant => summary.not_compliant += 1,
                _ => {}
            }
            *summary
                .by_status
                .entry(record.status.as_str().to_string())
                .or_insert(0) += 1;
        }

        summary.errors = summary.total - summary.compliant - summary.not_compliant;
        summary
    }

    /// Percentage of compliant records among those that were actually judged.
    pub fn compliance_rate(&self) -> f64 {
        let judged = self.compliant + self.not_compliant;
        if judged == 0 {
            0.0
        } else {
            self.compliant as f64 / judged as f64 * 100.0
        }
    }
}

/// Convenience wrapper over [`ComplianceSummary::from_records`].
pub fn summarize(records: &[ResultRecord]) -> ComplianceSummary {
    ComplianceSummary::from_records(records)
}
