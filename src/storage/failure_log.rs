//! Append-only log of records the store could not persist.
//!
//! One line per lost record: `<epoch_ms> - <message>`.

use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FailureLog {
    path: PathBuf,
}

impl FailureLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line. Errors are reported through tracing only; losing the
    /// failure record must not take the pipeline down with it.
    pub fn append(&self, message: &str) {
        if let Err(e) = self.try_append(message) {
            tracing::error!(
                path = %self.path.display(),
                error = %e,
                "Could not write to insertion failure log"
            );
        }
    }

    fn try_append(&self, message: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        // Keep one record per line whatever the error text contains.
        let message = message.replace(['\n', '\r'], " ");
        writeln!(file, "{} - {}", Utc::now().timestamp_millis(), message)
    }

    /// Lines currently in the log; empty if the file does not exist.
    pub fn entries(&self) -> std::io::Result<Vec<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(content.lines().map(str::to_string).collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_format() {
        let dir = tempfile::tempdir().unwrap();
        let log = FailureLog::new(dir.path().join("logs").join("failures.txt"));

        assert!(log.entries().unwrap().is_empty());

        log.append("first");
        log.append("second\nwith newline");

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 2);

        let (millis, message) = entries[0].split_once(" - ").unwrap();
        assert!(millis.parse::<i64>().unwrap() > 0);
        assert_eq!(message, "first");
        assert!(entries[1].ends_with("second with newline"));
    }
}
