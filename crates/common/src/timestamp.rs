//! Timestamp utilities.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Format of the timestamp prefix in rollback ledger file names.
pub const LEDGER_STAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Format of the timestamp suffix in report file names.
pub const REPORT_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// A wrapper around DateTime<Utc> with consistent serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create a new timestamp from the current time.
    pub fn now() -> Self {
        Timestamp(Utc::now())
    }

    /// Create a timestamp from a DateTime<Utc>.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Timestamp(dt)
    }

    /// Parse a ledger stamp (`YYYYMMDD-HHMMSS`), read as UTC.
    pub fn parse_ledger_stamp(stamp: &str) -> Option<Self> {
        NaiveDateTime::parse_from_str(stamp, LEDGER_STAMP_FORMAT)
            .ok()
            .map(|naive| Timestamp(naive.and_utc()))
    }

    /// Get the inner DateTime<Utc>.
    pub fn inner(&self) -> DateTime<Utc> {
        self.0
    }

    /// Format as ISO 8601 string.
    pub fn to_iso8601(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
    }

    /// Format as a ledger file name prefix.
    pub fn to_ledger_stamp(&self) -> String {
        self.0.format(LEDGER_STAMP_FORMAT).to_string()
    }

    /// Format as a report file name suffix.
    pub fn to_report_stamp(&self) -> String {
        self.0.format(REPORT_STAMP_FORMAT).to_string()
    }

    /// This timestamp shifted by whole seconds.
    pub fn plus_seconds(&self, seconds: i64) -> Self {
        Timestamp(self.0 + Duration::seconds(seconds))
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_iso8601())
    }
}
