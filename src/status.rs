//! Status store: the persisted awake/sleeping flag.
//!
//! The flag lives in a small JSON key-value file written by the CLI
//! (`sleep-monitor sleep` / `wake`) and read once per collection tick.

use crate::core::record::Status;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const STATUS_KEY: &str = "status";

/// Anything the collection cycle can ask for the current status.
pub trait StatusSource: Send {
    fn current(&self) -> Status;
}

impl<F> StatusSource for F
where
    F: Fn() -> Status + Send,
{
    fn current(&self) -> Status {
        self()
    }
}

/// A status that never changes.
#[derive(Debug, Clone, Copy)]
pub struct FixedStatus(pub Status);

impl StatusSource for FixedStatus {
    fn current(&self) -> Status {
        self.0
    }
}

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// File-backed key-value store.
#[derive(Debug, Clone)]
pub struct FileStatusStore {
    path: PathBuf,
}

impl FileStatusStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, StatusError> {
        Ok(self.read()?.remove(key))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), StatusError> {
        let mut values = self.read()?;
        values.insert(key.to_string(), value.to_string());

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Write-then-rename so a concurrent reader never sees a torn file.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&values)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn set_status(&self, status: Status) -> Result<(), StatusError> {
        self.set(STATUS_KEY, status.as_str())
    }

    fn read(&self) -> Result<BTreeMap<String, String>, StatusError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl StatusSource for FileStatusStore {
    fn current(&self) -> Status {
        match self.get(STATUS_KEY) {
            Ok(flag) => Status::from_flag(flag.as_deref()),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Unreadable status flag, assuming awake");
                Status::Awake
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_reads_awake() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStatusStore::new(dir.path().join("status.json"));
        assert_eq!(store.get(STATUS_KEY).unwrap(), None);
        assert_eq!(store.current(), Status::Awake);
    }

    #[test]
    fn test_set_and_read_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStatusStore::new(dir.path().join("state").join("status.json"));

        store.set_status(Status::Sleeping).unwrap();
        assert_eq!(store.current(), Status::Sleeping);

        store.set("other", "kept").unwrap();
        store.set_status(Status::Awake).unwrap();
        assert_eq!(store.current(), Status::Awake);
        assert_eq!(store.get("other").unwrap().as_deref(), Some("kept"));
    }

    #[test]
    fn test_corrupt_file_reads_awake() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = FileStatusStore::new(path);
        assert!(store.get(STATUS_KEY).is_err());
        assert_eq!(store.current(), Status::Awake);
    }

    #[test]
    fn test_empty_value_reads_awake() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStatusStore::new(dir.path().join("status.json"));
        store.set(STATUS_KEY, "").unwrap();
        assert_eq!(store.current(), Status::Awake);
    }

    #[test]
    fn test_closure_source() {
        let source = || Status::Sleeping;
        assert_eq!(StatusSource::current(&source), Status::Sleeping);
        assert_eq!(FixedStatus(Status::Awake).current(), Status::Awake);
    }
}
