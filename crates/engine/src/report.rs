//! Hardening reports written to disk after a run.

use crate::summary::{summarize, ComplianceSummary};
use handlebars::Handlebars;
use hardkit_common::{Error, Platform, Result, Timestamp};
use hardkit_schema::{Level, ResultRecord, ResultStatus};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

const REPORT_TITLE: &str = "System Hardening Report";

const HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{{title}}</title>
<style>
body { font-family: sans-serif; margin: 2em; }
table { border-collapse: collapse; width: 100%; }
th, td { border: 1px solid #ccc; padding: 4px 8px; text-align: left; vertical-align: top; }
.Low { color: #008000; }
.High { color: #ff0000; }
.Info { color: #000000; }
</style>
</head>
<body>
<h1>{{title}}</h1>
<p>Scan completed on: {{generated_at}}</p>
<p>Platform: {{platform}} &middot; Level: {{level}}</p>
<p>Compliant: {{summary.compliant}} &middot; Not compliant: {{summary.not_compliant}} &middot; Other: {{summary.errors}} &middot; Total: {{summary.total}}</p>
<table>
<tr><th>Policy</th><th>Status</th><th>Severity</th><th>Details</th></tr>
{{#each findings}}
<tr class="{{severity}}"><td>{{parameter}}</td><td>{{status}}</td><td>{{severity}}</td><td>{{details}}</td></tr>
{{/each}}
</table>
</body>
</html>
"#;

/// Turns a run's records into a report file.
pub trait ReportGenerator: Send + Sync {
    /// Write a report and return its path. Records are rendered in the given order.
    fn generate(&self, records: &[ResultRecord], platform: Platform, level: Level)
        -> Result<PathBuf>;
}

/// Severity shown next to each finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Low,
    High,
    Info,
}

impl Severity {
    pub fn of(status: &ResultStatus) -> Self {
        match status {
            ResultStatus::Compliant => Severity::Low,
            ResultStatus::Failure => Severity::High,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "Low"),
            Severity::High => write!(f, "High"),
            Severity::Info => write!(f, "Info"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
    Html,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Text => "txt",
            ReportFormat::Json => "json",
            ReportFormat::Html => "html",
        }
    }
}

impl FromStr for ReportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            "html" => Ok(ReportFormat::Html),
            other => Err(Error::Report(format!(
                "unknown report format {:?} (expected text, json or html)",
                other
            ))),
        }
    }
}

#[derive(Debug, Serialize)]
struct Finding<'a> {
    parameter: &'a str,
    status: &'a str,
    details: &'a str,
    severity: Severity,
}

#[derive(Debug, Serialize)]
struct ReportDocument<'a> {
    title: &'static str,
    generated_at: String,
    platform: Platform,
    level: Level,
    summary: ComplianceSummary,
    findings: Vec<Finding<'a>>,
}

impl<'a> ReportDocument<'a> {
    fn new(records: &'a [ResultRecord], platform: Platform, level: Level, at: Timestamp) -> Self {
        Self {
            title: REPORT_TITLE,
            generated_at: at.inner().format("%Y-%m-%d %H:%M:%S").to_string(),
            platform,
            level,
            summary: summarize(records),
            findings: records
                .iter()
                .map(|r| Finding {
                    parameter: &r.parameter,
                    status: r.status.as_str(),
                    details: &r.details,
                    severity: Severity::of(&r.status),
                })
                .collect(),
        }
    }
}

/// Writes `Hardening_Report_<YYYYMMDD_HHMMSS>.<ext>` into a directory.
pub struct FileReportGenerator {
    out_dir: PathBuf,
    format: ReportFormat,
}

impl FileReportGenerator {
    pub fn new(out_dir: impl Into<PathBuf>, format: ReportFormat) -> Self {
        Self {
            out_dir: out_dir.into(),
            format,
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    fn render(&self, doc: &ReportDocument<'_>) -> Result<String> {
        match self.format {
            ReportFormat::Text => Ok(render_text(doc)),
            ReportFormat::Json => Ok(serde_json::to_string_pretty(doc)?),
            ReportFormat::Html => render_html(doc),
        }
    }
}

impl ReportGenerator for FileReportGenerator {
    fn generate(
        &self,
        records: &[ResultRecord],
        platform: Platform,
        level: Level,
    ) -> Result<PathBuf> {
        let now = Timestamp::now();
        let doc = ReportDocument::new(records, platform, level, now);
        let content = self.render(&doc)?;

        std::fs::create_dir_all(&self.out_dir)?;
        let path = self.out_dir.join(format!(
            "Hardening_Report_{}.{}",
            now.to_report_stamp(),
            self.format.extension()
        ));
        std::fs::write(&path, content)?;

        info!("Wrote report {:?} ({} findings)", path, records.len());
        Ok(path)
    }
}

fn render_text(doc: &ReportDocument<'_>) -> String {
    let mut out = String::new();

    out.push_str(&format!("{}\n\n", doc.title));
    out.push_str(&format!("Scan completed on: {}\n", doc.generated_at));
    out.push_str(&format!("Platform: {}  Level: {}\n", doc.platform, doc.level));
    out.push_str(&format!(
        "Compliant: {}  Not compliant: {}  Other: {}  Total: {}\n\n",
        doc.summary.compliant, doc.summary.not_compliant, doc.summary.errors, doc.summary.total
    ));

    for finding in &doc.findings {
        out.push_str(&format!("Policy: {}\n", finding.parameter));
        out.push_str(&format!(
            "Status: {} (Severity: {})\n",
            finding.status, finding.severity
        ));
        out.push_str(&format!("Details: {}\n\n", finding.details));
    }

    out
}

fn render_html(doc: &ReportDocument<'_>) -> Result<String> {
    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(true);
    handlebars
        .register_template_string("report", HTML_TEMPLATE)
        .map_err(|e| Error::Report(e.to_string()))?;
    handlebars
        .render("report", doc)
        .map_err(|e| Error::Report(e.to_string()))
}
