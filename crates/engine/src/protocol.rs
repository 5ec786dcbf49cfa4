//! Parser for the NDJSON module output protocol.
//!
//! Each stdout line is expected to hold one JSON object:
//! `{"status": ..., "parameter": ..., "details": ..., "value": ...}`.
//! Anything else becomes a Warning record carrying the raw text.

use hardkit_schema::{ResultRecord, ResultStatus};
use serde_json::{Map, Value};
use tracing::{trace, warn};

/// Parse one line of module output.
///
/// Returns `None` for blank lines.
pub fn parse_line(line: &str) -> Option<ResultRecord> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }

    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(object)) => {
            trace!("Parsed record line: {}", line);
            Some(record_from_object(object))
        }
        Ok(_) | Err(_) => {
            warn!("Malformed module output line: {}", line);
            Some(ResultRecord::raw_output(line))
        }
    }
}

fn record_from_object(mut object: Map<String, Value>) -> ResultRecord {
    let status = match object.remove("status") {
        Some(Value::String(s)) => ResultStatus::from(s),
        Some(other) => ResultStatus::from(text_of(other)),
        None => ResultStatus::Info,
    };

    ResultRecord {
        parameter: object.remove("parameter").map(text_of).unwrap_or_default(),
        status,
        details: object.remove("details").map(text_of).unwrap_or_default(),
        value: object.remove("value"),
    }
}

/// Strings are taken as-is; other JSON values keep their JSON text.
fn text_of(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
