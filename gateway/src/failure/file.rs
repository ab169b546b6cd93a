//! Tab-separated failure file

use super::{FailureRecord, FailureSink};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Header written when the failure file is created
pub const FAILURE_FILE_HEADER: &str = "DATE\tTOPIC\tMESSAGE\n";

/// Appends failed publishes to a tab-separated file
///
/// The file is never truncated or rotated here.
pub struct FileFailureSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileFailureSink {
    /// Open `path` for appending, creating it with a header if absent
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if file.metadata()?.len() == 0 {
            file.write_all(FAILURE_FILE_HEADER.as_bytes())?;
            file.flush()?;
        }

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Location of the failure file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FailureSink for FileFailureSink {
    fn name(&self) -> &'static str {
        "file"
    }

    fn record(
        &self,
        topic: &str,
        message: &str,
        timestamp: DateTime<Local>,
    ) -> std::io::Result<()> {
        let line = FailureRecord::new(topic, message, timestamp).to_line();
        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        file.flush()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_creates_file_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/failures.tsv");

        let sink = FileFailureSink::open(&path).unwrap();

        assert_eq!(sink.path(), path.as_path());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), FAILURE_FILE_HEADER);
    }

    #[test]
    fn test_reopen_does_not_repeat_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failures.tsv");

        let sink = FileFailureSink::open(&path).unwrap();
        sink.record("topic.A", r#"{"x":1}"#, Local::now()).unwrap();
        drop(sink);

        let sink = FileFailureSink::open(&path).unwrap();
        sink.record("topic.B", r#"{"x":2}"#, Local::now()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "DATE\tTOPIC\tMESSAGE");
        assert!(lines[1].ends_with("\ttopic.A\t{\"x\":1}"));
        assert!(lines[2].ends_with("\ttopic.B\t{\"x\":2}"));
    }

    #[test]
    fn test_record_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failures.tsv");
        let sink = FileFailureSink::open(&path).unwrap();

        let now = Local::now();
        sink.record("topic.A", r#"{"x":1}"#, now).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let record = contents.lines().nth(1).unwrap();
        let fields: Vec<&str> = record.split('\t').collect();
        assert_eq!(
            fields,
            vec![
                now.format("%Y-%m-%d").to_string().as_str(),
                "topic.A",
                "{\"x\":1}"
            ]
        );
    }

    #[test]
    fn test_concurrent_records_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failures.tsv");
        let sink = Arc::new(FileFailureSink::open(&path).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let body = format!(r#"{{"thread":{t},"i":{i}}}"#);
                        sink.record("topic.C", &body, Local::now()).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let records: Vec<&str> = contents.lines().skip(1).collect();
        assert_eq!(records.len(), 200);
        assert!(records.iter().all(|line| line.split('\t').count() == 3));
    }
}
