//! Failure sinks
//!
//! Durable record of publishes the broker did not take, for operators to
//! inspect or replay. The running gateway only ever appends.
//!
//! - **FileFailureSink**: tab-separated `DATE\tTOPIC\tMESSAGE` file (default)
//! - **MemoryFailureSink**: bounded in-memory ring for tests and embedders
//!
//! # Example
//!
//! ```ignore
//! use pubgate_gateway::failure::*;
//!
//! let sink = Arc::new(MemoryFailureSink::new(1000));
//! let gateway = Gateway::new(config, connector).with_failure_sink(sink.clone());
//! ```

mod file;
mod memory;

pub use file::{FAILURE_FILE_HEADER, FileFailureSink};
pub use memory::MemoryFailureSink;

use chrono::{DateTime, Local, NaiveDate};
use std::borrow::Cow;

/// Field separator of a failure line
pub const FIELD_DELIMITER: char = '\t';

/// One failed publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    /// Local date of the failed attempt
    pub date: NaiveDate,
    /// Topic the message was published to
    pub topic: String,
    /// Serialized message body
    pub message: String,
}

impl FailureRecord {
    /// Build a record for an attempt made at `timestamp`
    pub fn new(topic: &str, message: &str, timestamp: DateTime<Local>) -> Self {
        Self {
            date: timestamp.date_naive(),
            topic: topic.to_string(),
            message: message.to_string(),
        }
    }

    /// Render as one newline-terminated line of the failure file
    ///
    /// Tabs and line breaks inside a field are written as `\t`, `\n` and
    /// `\r` so every record stays on one line with exactly three fields.
    pub fn to_line(&self) -> String {
        format!(
            "{}{FIELD_DELIMITER}{}{FIELD_DELIMITER}{}\n",
            self.date.format("%Y-%m-%d"),
            escape_field(&self.topic),
            escape_field(&self.message)
        )
    }
}

fn escape_field(field: &str) -> Cow<'_, str> {
    if !field.contains(['\t', '\n', '\r']) {
        return Cow::Borrowed(field);
    }
    let mut escaped = String::with_capacity(field.len() + 4);
    for c in field.chars() {
        match c {
            '\t' => escaped.push_str("\\t"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            other => escaped.push(other),
        }
    }
    Cow::Owned(escaped)
}

/// Append-only destination for failed publishes
///
/// Called from the publisher worker; implementations must still be safe to
/// call from several threads at once.
pub trait FailureSink: Send + Sync {
    /// Sink name for logs
    fn name(&self) -> &'static str;

    /// Append one record
    fn record(
        &self,
        topic: &str,
        message: &str,
        timestamp: DateTime<Local>,
    ) -> std::io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_line_format() {
        let ts = Local.with_ymd_and_hms(2024, 3, 9, 23, 59, 0).single();
        let Some(ts) = ts else {
            return;
        };
        let record = FailureRecord::new("topic.A", r#"{"x":1}"#, ts);
        assert_eq!(record.to_line(), "2024-03-09\ttopic.A\t{\"x\":1}\n");
    }

    #[test]
    fn test_control_characters_stay_on_one_line() {
        let Some(ts) = Local.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).single() else {
            return;
        };
        let record = FailureRecord::new("topic\tA\nB", "line one\r\nline\ttwo", ts);
        let line = record.to_line();

        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.ends_with('\n'));
        let fields: Vec<&str> = line.trim_end_matches('\n').split(FIELD_DELIMITER).collect();
        assert_eq!(fields, vec!["2024-03-09", "topic\\tA\\nB", "line one\\r\\nline\\ttwo"]);
    }
}
