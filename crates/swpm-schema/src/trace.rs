//! Structured trace records for a single engine step.
//!
//! Traces accumulate in memory over the course of one request and are
//! persisted to disk only around reboot-bearing transitions, then reloaded
//! (and the file deleted) the next time the same package is acted on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One operation's trace record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// Name of the operation this trace describes (e.g. `"install"`,
    /// `"validate"`, `"DownloadManifest"`).
    pub operation: String,
    /// Process exit code, if the operation ran an external action.
    pub exit_code: Option<i32>,
    /// When the operation started.
    pub start: DateTime<Utc>,
    /// When the operation stopped, if it has.
    pub stop: Option<DateTime<Utc>>,
    /// Error message, if the operation failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Free-form informational lines collected during the operation.
    #[serde(default)]
    pub info: Vec<String>,
}

impl Trace {
    /// Start a new trace for `operation` at `start`.
    pub fn start(operation: impl Into<String>, start: DateTime<Utc>) -> Self {
        Self {
            operation: operation.into(),
            exit_code: None,
            start,
            stop: None,
            error: None,
            info: Vec::new(),
        }
    }

    /// Mark this trace as finished successfully.
    pub fn finish(&mut self, stop: DateTime<Utc>, exit_code: i32) {
        self.stop = Some(stop);
        self.exit_code = Some(exit_code);
    }

    /// Mark this trace as finished with an error.
    pub fn finish_error(&mut self, stop: DateTime<Utc>, error: impl Into<String>) {
        self.stop = Some(stop);
        self.exit_code = Some(1);
        self.error = Some(error.into());
    }

    /// Append an informational line.
    pub fn log(&mut self, line: impl Into<String>) {
        self.info.push(line.into());
    }
}

/// An ordered, in-memory sequence of traces accumulated for one request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tracer {
    traces: Vec<Trace>,
}

impl Tracer {
    /// An empty tracer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tracer from previously persisted traces, as returned by
    /// `LoadTraces` on resume.
    pub fn from_traces(traces: Vec<Trace>) -> Self {
        Self { traces }
    }

    /// Append a trace.
    pub fn push(&mut self, trace: Trace) {
        self.traces.push(trace);
    }

    /// All traces accumulated so far, in order.
    pub fn traces(&self) -> &[Trace] {
        &self.traces
    }

    /// Consume this tracer, returning its traces.
    pub fn into_traces(self) -> Vec<Trace> {
        self.traces
    }

    /// Render the info lines of every trace as one stdout-style log,
    /// truncated to `max_len` bytes (prefix-truncation, as the response
    /// contract requires).
    pub fn render_stdout(&self, max_len: usize) -> String {
        let mut out = String::new();
        for trace in &self.traces {
            for line in &trace.info {
                out.push_str(line);
                out.push('\n');
            }
        }
        truncate_prefix(&out, max_len)
    }

    /// Render the error lines of every trace as one stderr-style log,
    /// truncated to `max_len` bytes.
    pub fn render_stderr(&self, max_len: usize) -> String {
        let mut out = String::new();
        for trace in &self.traces {
            if let Some(err) = &trace.error {
                out.push_str(err);
                out.push('\n');
            }
        }
        truncate_prefix(&out, max_len)
    }
}

fn truncate_prefix(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    // Truncate on a char boundary so multi-byte UTF-8 sequences aren't split.
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
