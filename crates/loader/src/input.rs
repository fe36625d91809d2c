//! NDJSON input
//!
//! One JSON object per line. Blank lines are skipped; anything else that is
//! not an object is rejected and counted, and reading continues.

use serde::Serialize;
use strata_bulk::Record;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Classification of a single input line
#[derive(Debug, PartialEq)]
pub enum Line {
    Record(Record),
    Blank,
    Rejected(String),
}

/// Parse one NDJSON line
pub fn parse_line(line: &str) -> Line {
    let line = line.trim();
    if line.is_empty() {
        return Line::Blank;
    }

    match serde_json::from_str::<serde_json::Value>(line) {
        Ok(serde_json::Value::Object(record)) => Line::Record(record),
        Ok(other) => Line::Rejected(format!("expected a JSON object, got {}", kind(&other))),
        Err(e) => Line::Rejected(e.to_string()),
    }
}

fn kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Line counts for one input stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InputSummary {
    pub lines: u64,
    pub accepted: u64,
    pub rejected: u64,
}

/// Read `reader` to the end, handing every record to `sink`
pub async fn read_records<R>(reader: R, mut sink: impl FnMut(Record)) -> std::io::Result<InputSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = InputSummary::default();
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        summary.lines += 1;
        match parse_line(&line) {
            Line::Record(record) => {
                summary.accepted += 1;
                sink(record);
            }
            Line::Blank => {}
            Line::Rejected(reason) => {
                summary.rejected += 1;
                tracing::warn!(line = summary.lines, reason = %reason, "rejected input line");
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
#[path = "input_test.rs"]
mod input_test;
