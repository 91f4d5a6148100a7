//! Reassembly of server-sent event responses into one JSON result.
//!
//! The MCP endpoint may answer a POST with `text/event-stream` instead
//! of plain JSON: a sequence of `event:`/`data:` frames where the last
//! complete `data:` payload carries the JSON-RPC response. The
//! accumulator below collects frames line by line and keeps the most
//! recent payload that parses as JSON, so a partial or heartbeat frame
//! never clobbers a good one.

use serde_json::Value;

/// Accumulator state machine over SSE lines.
#[derive(Debug, Default)]
pub struct SseAccumulator {
    /// Last `data:` payload that parsed as JSON.
    last: Option<Value>,
    /// Buffer for a multi-line data field within one frame.
    pending: String,
}

impl SseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line of the event stream.
    pub fn push_line(&mut self, raw: &str) {
        let line = raw.trim_end_matches('\r');

        if line.is_empty() {
            // Frame boundary: try to finalize whatever data we buffered.
            self.flush_pending();
            return;
        }

        if let Some(rest) = strip_field(line, "data:") {
            if !self.pending.is_empty() {
                self.pending.push('\n');
            }
            self.pending.push_str(rest);
        }
        // `event:`, `id:`, `retry:` and comment lines are ignored; only
        // the data payload matters for reassembly.
    }

    fn flush_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        if let Ok(value) = serde_json::from_str::<Value>(&self.pending) {
            self.last = Some(value);
        }
        self.pending.clear();
    }

    /// Terminal: return the assembled result, if any frame carried one.
    pub fn finish(mut self) -> Option<Value> {
        self.flush_pending();
        self.last
    }
}

/// Parse a full SSE body into one JSON value. Falls back to parsing
/// the whole body as JSON for servers that mislabel the content type.
pub fn parse_sse_body(body: &str) -> Option<Value> {
    let mut acc = SseAccumulator::new();
    for line in body.lines() {
        acc.push_line(line);
    }
    acc.finish().or_else(|| serde_json::from_str(body).ok())
}

fn strip_field<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(field)?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}
