//! Pipeline transparency log.
//!
//! Counts what the agent collected, stored, lost and exported so an operator
//! can audit the pipeline without opening the database.

use crate::storage::InsertOutcome;
use crate::storage::InsertStrategy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Pipeline statistics for the current session.
#[derive(Debug)]
pub struct TransparencyLog {
    /// Collection ticks run
    ticks: AtomicU64,
    /// Records handed to the write queue
    records_enqueued: AtomicU64,
    /// Records persisted by any strategy
    records_inserted: AtomicU64,
    /// Records persisted by the SQLite-clock fallback
    fallback_inserts: AtomicU64,
    /// Records dropped after every strategy failed
    records_lost: AtomicU64,
    /// Busy-database retries across all inserts
    lock_retries: AtomicU64,
    /// Successful export + reset cycles
    exports_completed: AtomicU64,
    /// Exports that failed and left the store intact
    exports_failed: AtomicU64,
    /// Rows written to CSV files
    rows_exported: AtomicU64,
    /// Session identifier
    session_id: Uuid,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl TransparencyLog {
    /// Create a new transparency log.
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            records_enqueued: AtomicU64::new(0),
            records_inserted: AtomicU64::new(0),
            fallback_inserts: AtomicU64::new(0),
            records_lost: AtomicU64::new(0),
            lock_retries: AtomicU64::new(0),
            exports_completed: AtomicU64::new(0),
            exports_failed: AtomicU64::new(0),
            rows_exported: AtomicU64::new(0),
            session_id: Uuid::new_v4(),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a transparency log with persistence.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        // Try to load existing stats
        if let Err(e) = log.load() {
            tracing::warn!("Could not load previous pipeline stats: {e}");
        }

        log
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enqueued(&self) {
        self.records_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Account for the result of one store insert.
    pub fn record_insert(&self, outcome: &InsertOutcome) {
        match outcome {
            InsertOutcome::Inserted {
                strategy,
                lock_retries,
                ..
            } => {
                self.records_inserted.fetch_add(1, Ordering::Relaxed);
                if *strategy == InsertStrategy::SqliteClock {
                    self.fallback_inserts.fetch_add(1, Ordering::Relaxed);
                }
                self.lock_retries
                    .fetch_add(u64::from(*lock_retries), Ordering::Relaxed);
            }
            InsertOutcome::Lost { lock_retries } => {
                self.records_lost.fetch_add(1, Ordering::Relaxed);
                self.lock_retries
                    .fetch_add(u64::from(*lock_retries), Ordering::Relaxed);
            }
        }
    }

    pub fn record_export(&self, rows: u64) {
        self.exports_completed.fetch_add(1, Ordering::Relaxed);
        self.rows_exported.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn record_export_failure(&self) {
        self.exports_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> TransparencyStats {
        TransparencyStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            records_enqueued: self.records_enqueued.load(Ordering::Relaxed),
            records_inserted: self.records_inserted.load(Ordering::Relaxed),
            fallback_inserts: self.fallback_inserts.load(Ordering::Relaxed),
            records_lost: self.records_lost.load(Ordering::Relaxed),
            lock_retries: self.lock_retries.load(Ordering::Relaxed),
            exports_completed: self.exports_completed.load(Ordering::Relaxed),
            exports_failed: self.exports_failed.load(Ordering::Relaxed),
            rows_exported: self.rows_exported.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Statistics:\n\
             - Ticks: {}\n\
             - Records enqueued: {}\n\
             - Records stored: {} ({} via fallback)\n\
             - Records lost: {}\n\
             - Busy retries: {}\n\
             - Exports: {} completed, {} failed ({} rows)\n\
             - Session duration: {} seconds",
            stats.ticks,
            stats.records_enqueued,
            stats.records_inserted,
            stats.fallback_inserts,
            stats.records_lost,
            stats.lock_retries,
            stats.exports_completed,
            stats.exports_failed,
            stats.rows_exported,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            // Ensure parent directory exists
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                ticks: stats.ticks,
                records_enqueued: stats.records_enqueued,
                records_inserted: stats.records_inserted,
                fallback_inserts: stats.fallback_inserts,
                records_lost: stats.records_lost,
                lock_retries: stats.lock_retries,
                exports_completed: stats.exports_completed,
                exports_failed: stats.exports_failed,
                rows_exported: stats.rows_exported,
                last_session_id: Some(self.session_id),
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    /// Load stats from disk.
    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.ticks.store(persisted.ticks, Ordering::Relaxed);
                self.records_enqueued
                    .store(persisted.records_enqueued, Ordering::Relaxed);
                self.records_inserted
                    .store(persisted.records_inserted, Ordering::Relaxed);
                self.fallback_inserts
                    .store(persisted.fallback_inserts, Ordering::Relaxed);
                self.records_lost
                    .store(persisted.records_lost, Ordering::Relaxed);
                self.lock_retries
                    .store(persisted.lock_retries, Ordering::Relaxed);
                self.exports_completed
                    .store(persisted.exports_completed, Ordering::Relaxed);
                self.exports_failed
                    .store(persisted.exports_failed, Ordering::Relaxed);
                self.rows_exported
                    .store(persisted.rows_exported, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for TransparencyLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of pipeline statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransparencyStats {
    pub ticks: u64,
    pub records_enqueued: u64,
    pub records_inserted: u64,
    pub fallback_inserts: u64,
    pub records_lost: u64,
    pub lock_retries: u64,
    pub exports_completed: u64,
    pub exports_failed: u64,
    pub rows_exported: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedStats {
    pub ticks: u64,
    pub records_enqueued: u64,
    pub records_inserted: u64,
    #[serde(default)]
    pub fallback_inserts: u64,
    pub records_lost: u64,
    #[serde(default)]
    pub lock_retries: u64,
    pub exports_completed: u64,
    pub exports_failed: u64,
    pub rows_exported: u64,
    #[serde(default)]
    pub last_session_id: Option<Uuid>,
    pub last_updated: DateTime<Utc>,
}

/// Thread-safe shared transparency log.
pub type SharedTransparencyLog = Arc<TransparencyLog>;

/// Create a new shared transparency log.
pub fn create_shared_log() -> SharedTransparencyLog {
    Arc::new(TransparencyLog::new())
}

/// Create a new shared transparency log with persistence.
pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedTransparencyLog {
    Arc::new(TransparencyLog::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_outcomes_counted() {
        let log = TransparencyLog::new();

        log.record_insert(&InsertOutcome::Inserted {
            id: 1,
            strategy: InsertStrategy::Sequenced,
            lock_retries: 2,
        });
        log.record_insert(&InsertOutcome::Inserted {
            id: 2,
            strategy: InsertStrategy::SqliteClock,
            lock_retries: 0,
        });
        log.record_insert(&InsertOutcome::Lost { lock_retries: 1 });

        let stats = log.stats();
        assert_eq!(stats.records_inserted, 2);
        assert_eq!(stats.fallback_inserts, 1);
        assert_eq!(stats.records_lost, 1);
        assert_eq!(stats.lock_retries, 3);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");

        let log = TransparencyLog::with_persistence(path.clone());
        log.record_tick();
        log.record_enqueued();
        log.record_export(1440);
        log.record_export_failure();
        log.save().unwrap();

        let reloaded = TransparencyLog::with_persistence(path);
        let stats = reloaded.stats();
        assert_eq!(stats.ticks, 1);
        assert_eq!(stats.records_enqueued, 1);
        assert_eq!(stats.exports_completed, 1);
        assert_eq!(stats.exports_failed, 1);
        assert_eq!(stats.rows_exported, 1440);
    }

    #[test]
    fn test_summary_format() {
        let log = TransparencyLog::new();
        let summary = log.summary();

        assert!(summary.contains("Ticks"));
        assert!(summary.contains("Records lost"));
        assert!(summary.contains("Exports"));
    }
}
