//! CSV export and the export-then-reset rollover.
//!
//! Exported files are named `sleep_data_<YYYYMMDD_HHMMSS>.csv`; a second
//! export in the same second gets `_1`, then `_2`, and so on. Files are
//! created with `create_new`, so an existing export is never overwritten.

use crate::core::record::{StoredRow, CSV_HEADER};
use crate::storage::{SqliteStore, StoreError};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Upper bound on same-second suffixes tried before giving up.
const MAX_NAME_SUFFIX: u32 = 10_000;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("No free export filename for {0}")]
    NameExhausted(String),
    #[error("Failed to read store: {0}")]
    Store(#[from] StoreError),
}

/// A CSV file that was fully written and synced.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportReport {
    pub path: PathBuf,
    pub rows: usize,
    /// Highest exported row id
    pub last_id: Option<i64>,
    /// Timestamp of that row; together with the id it names the row even
    /// after ids restart
    pub last_timestamp: Option<String>,
}

/// Result of a rollover that got past the export step.
#[derive(Debug)]
pub enum RolloverOutcome {
    /// Exported and reset.
    Completed(ExportReport),
    /// Exported, but the table could not be reset. The exported rows are
    /// still in the store and must be discarded before the next export.
    ResetFailed {
        report: ExportReport,
        error: StoreError,
    },
    /// Nothing to export.
    Empty,
}

#[derive(Debug, Clone)]
pub struct Exporter {
    dir: PathBuf,
    timezone: Tz,
}

impl Exporter {
    pub fn new(dir: impl Into<PathBuf>, timezone: Tz) -> Self {
        Self {
            dir: dir.into(),
            timezone,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Export the store and reset it, holding the store for the whole
    /// sequence. The table is only reset after the file is fully written.
    pub fn rollover(&self, store: &SqliteStore) -> Result<RolloverOutcome, ExportError> {
        let guard = store.begin_rollover()?;
        let rows = guard.rows()?;
        if rows.is_empty() {
            return Ok(RolloverOutcome::Empty);
        }

        let report = self.export(&rows)?;

        match guard.reset() {
            Ok(()) => {
                tracing::info!(
                    path = %report.path.display(),
                    rows = report.rows,
                    "Rollover complete"
                );
                Ok(RolloverOutcome::Completed(report))
            }
            Err(error) => {
                tracing::error!(
                    path = %report.path.display(),
                    error = %error,
                    "Export written but store reset failed"
                );
                Ok(RolloverOutcome::ResetFailed { report, error })
            }
        }
    }

    /// Write `rows` to a new CSV file stamped with the current time.
    pub fn export(&self, rows: &[StoredRow]) -> Result<ExportReport, ExportError> {
        self.export_at(rows, Utc::now())
    }

    pub fn export_at(
        &self,
        rows: &[StoredRow],
        now: DateTime<Utc>,
    ) -> Result<ExportReport, ExportError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| ExportError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let stem = self.file_stem(now);
        let (path, file) = self.create_unique(&stem)?;

        if let Err(source) = write_rows(file, rows) {
            // Leave no partial export behind; the rows stay in the store.
            let _ = std::fs::remove_file(&path);
            tracing::error!(path = %path.display(), error = %source, "CSV export failed");
            return Err(ExportError::Io { path, source });
        }

        tracing::info!(path = %path.display(), rows = rows.len(), "CSV export written");
        Ok(ExportReport {
            path,
            rows: rows.len(),
            last_id: rows.last().map(|r| r.id),
            last_timestamp: rows.last().map(|r| r.timestamp.clone()),
        })
    }

    /// `sleep_data_<YYYYMMDD_HHMMSS>` in the configured timezone.
    pub fn file_stem(&self, now: DateTime<Utc>) -> String {
        format!(
            "sleep_data_{}",
            now.with_timezone(&self.timezone).format("%Y%m%d_%H%M%S")
        )
    }

    fn create_unique(&self, stem: &str) -> Result<(PathBuf, File), ExportError> {
        for n in 0..=MAX_NAME_SUFFIX {
            let name = if n == 0 {
                format!("{stem}.csv")
            } else {
                format!("{stem}_{n}.csv")
            };
            let path = self.dir.join(name);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(ExportError::Io { path, source }),
            }
        }
        Err(ExportError::NameExhausted(stem.to_string()))
    }
}

fn write_rows(file: File, rows: &[StoredRow]) -> std::io::Result<()> {
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{CSV_HEADER}")?;
    for row in rows {
        writeln!(writer, "{}", row.to_csv_line())?;
    }
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()
}
