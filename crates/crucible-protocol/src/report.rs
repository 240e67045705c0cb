//! Result payloads returned by the daemon's method handlers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A structured annotation extracted from captured output.
///
/// Markers are bracketed tags at the start of a line, `[TYPE]` or
/// `[TYPE:SUBTYPE]`, followed by free-form content. They are derived from an
/// execution's stdout on every call and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Marker {
    /// Tag name, e.g. `METRIC`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Optional qualifier after the colon, e.g. `accuracy`.
    pub subtype: Option<String>,
    /// Remainder of the line, trimmed of surrounding whitespace.
    pub content: String,
    /// 1-indexed line the bracket occupies in the scanned text.
    pub line_number: usize,
    /// Category from the fixed taxonomy, or `unknown`.
    pub category: String,
}

/// Process memory readings in megabytes, rounded to two decimal places.
///
/// Readings are best-effort: when the underlying query fails both values
/// degrade to `0.0`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct MemoryReading {
    /// Resident set size.
    pub rss_mb: f64,
    /// Virtual memory size.
    pub vms_mb: f64,
}

/// Wall-clock timing for one execute call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteTiming {
    /// RFC 3339 UTC timestamp taken when the run started.
    pub started_at: String,
    /// Elapsed milliseconds, rounded to two decimal places.
    pub duration_ms: f64,
}

/// Failure detail attached to an unsuccessful execute report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteError {
    /// Short kind name, e.g. `SyntaxError` or `Timeout`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Formatted trace; absent for timeouts.
    pub traceback: Option<String>,
}

/// Result payload for the `execute` method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteReport {
    /// Whether the unit of code ran to completion.
    pub success: bool,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Markers extracted from `stdout`, in document order.
    pub markers: Vec<Marker>,
    /// Reserved extension point; always empty.
    pub artifacts: Vec<Value>,
    /// Wall-clock timing for the run.
    pub timing: ExecuteTiming,
    /// Memory readings taken after the run.
    pub memory: MemoryReading,
    /// Failure detail when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecuteError>,
}

/// Result payload for the `reset` method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetReport {
    /// Always `"reset"`.
    pub status: String,
    /// Memory reading taken after the namespace was cleared.
    pub memory: MemoryReading,
}

impl ResetReport {
    /// Builds the acknowledgement for a completed reset.
    #[must_use]
    pub fn new(memory: MemoryReading) -> Self {
        Self {
            status: "reset".to_owned(),
            memory,
        }
    }
}

/// Result payload for the `get_state` method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateReport {
    /// Current memory reading.
    pub memory: MemoryReading,
    /// User-visible variable names, sorted.
    pub variables: Vec<String>,
    /// Number of entries in `variables`.
    pub variable_count: usize,
}

/// Result payload for the `interrupt` method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptReport {
    /// Always `"interrupt_requested"`: the signal was delivered, not
    /// necessarily honoured.
    pub status: String,
}

impl InterruptReport {
    /// Builds the acknowledgement for a delivered interrupt request.
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: "interrupt_requested".to_owned(),
        }
    }
}

impl Default for InterruptReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Result payload for the `ping` method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingReport {
    /// Always `"ok"`.
    pub status: String,
    /// RFC 3339 UTC timestamp taken when the request was handled.
    pub timestamp: String,
}

impl PingReport {
    /// Builds a liveness token stamped with `timestamp`.
    #[must_use]
    pub fn new(timestamp: String) -> Self {
        Self {
            status: "ok".to_owned(),
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_serializes_type_field_name() {
        let marker = Marker {
            kind: "METRIC".to_owned(),
            subtype: Some("accuracy".to_owned()),
            content: "0.95".to_owned(),
            line_number: 1,
            category: "calculations".to_owned(),
        };
        let line = serde_json::to_string(&marker).expect("serialize");

        assert!(line.contains(r#""type":"METRIC""#));
        assert!(line.contains(r#""subtype":"accuracy""#));
        assert!(line.contains(r#""line_number":1"#));
    }

    #[test]
    fn marker_without_subtype_serializes_null() {
        let marker = Marker {
            kind: "STEP".to_owned(),
            subtype: None,
            content: "start".to_owned(),
            line_number: 3,
            category: "workflow".to_owned(),
        };
        let line = serde_json::to_string(&marker).expect("serialize");

        assert!(line.contains(r#""subtype":null"#));
    }

    #[test]
    fn execute_report_keeps_artifacts_field_when_empty() {
        let report = ExecuteReport {
            success: true,
            stdout: String::new(),
            stderr: String::new(),
            markers: Vec::new(),
            artifacts: Vec::new(),
            timing: ExecuteTiming {
                started_at: "2026-01-01T00:00:00Z".to_owned(),
                duration_ms: 1.25,
            },
            memory: MemoryReading::default(),
            error: None,
        };
        let line = serde_json::to_string(&report).expect("serialize");

        assert!(line.contains(r#""artifacts":[]"#));
        assert!(!line.contains(r#""error""#));
    }
}
