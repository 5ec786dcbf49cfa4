//! Result records produced by modules or synthesized by the executor.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Parameter name used for output lines that could not be parsed.
pub const RAW_OUTPUT_PARAMETER: &str = "RAW Output";

/// Prefix of the parameter of the record appended for a non-zero exit.
pub const MODULE_ERROR_PREFIX: &str = "Module Error: ";

/// Status of a single finding.
///
/// Modules are free to emit statuses outside the recognized set; those are
/// kept verbatim in [`ResultStatus::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResultStatus {
    Compliant,
    NotCompliant,
    Success,
    Failure,
    Warning,
    Error,
    Info,
    Other(String),
}

impl ResultStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ResultStatus::Compliant => "Compliant",
            ResultStatus::NotCompliant => "NotCompliant",
            ResultStatus::Success => "Success",
            ResultStatus::Failure => "Failure",
            ResultStatus::Warning => "Warning",
            ResultStatus::Error => "Error",
            ResultStatus::Info => "Info",
            ResultStatus::Other(s) => s,
        }
    }

    /// Whether the status signals that something went wrong.
    pub fn is_fault(&self) -> bool {
        matches!(self, ResultStatus::Failure | ResultStatus::Error)
    }
}

impl From<String> for ResultStatus {
    fn from(s: String) -> Self {
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .flat_map(char::to_lowercase)
            .collect();
        match key.as_str() {
            "compliant" => ResultStatus::Compliant,
            "notcompliant" | "noncompliant" => ResultStatus::NotCompliant,
            "success" => ResultStatus::Success,
            "failure" => ResultStatus::Failure,
            "warning" => ResultStatus::Warning,
            "error" => ResultStatus::Error,
            "info" => ResultStatus::Info,
            _ => ResultStatus::Other(s),
        }
    }
}

impl From<&str> for ResultStatus {
    fn from(s: &str) -> Self {
        ResultStatus::from(s.to_string())
    }
}

impl From<ResultStatus> for String {
    fn from(status: ResultStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finding. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub parameter: String,
    pub status: ResultStatus,
    pub details: String,
    /// Pre-change state captured during Harden, for a later rollback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl ResultRecord {
    pub fn new(
        parameter: impl Into<String>,
        status: ResultStatus,
        details: impl Into<String>,
    ) -> Self {
        Self {
            parameter: parameter.into(),
            status,
            details: details.into(),
            value: None,
        }
    }

    /// Record for an output line that is not a JSON object.
    pub fn raw_output(line: &str) -> Self {
        Self::new(RAW_OUTPUT_PARAMETER, ResultStatus::Warning, line)
    }

    /// Record for a module whose file does not exist.
    pub fn module_not_found(module: &str) -> Self {
        Self::new(module, ResultStatus::Error, "module not found")
    }

    /// Record appended when a module exits non-zero.
    pub fn module_failure(module: &str, stderr: &str) -> Self {
        Self::new(
            format!("{}{}", MODULE_ERROR_PREFIX, module),
            ResultStatus::Failure,
            stderr.trim(),
        )
    }

    /// Record for a module killed because the run was cancelled.
    pub fn cancelled(module: &str) -> Self {
        Self::new(module, ResultStatus::Error, "cancelled")
    }

    /// Record for a module killed after exceeding its time limit.
    pub fn timed_out(module: &str, seconds: u64) -> Self {
        Self::new(
            module,
            ResultStatus::Error,
            format!("timed out after {}s", seconds),
        )
    }

    /// Record for a module that could not be started at all.
    pub fn invocation_failed(module: &str, reason: &str) -> Self {
        Self::new(module, ResultStatus::Error, reason)
    }

    pub fn with_value(mut self, value: serde_json::Value) -> Self {
        self.value = Some(value);
        self
    }
}
