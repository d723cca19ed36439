//! The per-tick collection cycle.
//!
//! Each tick reads the status flag, snapshots the sensor cache, enqueues one
//! record, waits for the writer to catch up, and rolls the store over to CSV
//! once the row count reaches the export threshold.
//!
//! At most one rollover is attempted per threshold crossing. If the export
//! succeeds but the reset does not, the exported rows are deleted by id on a
//! later tick before any new export is considered, so no row is exported
//! twice. The deletion is keyed on the last exported row's id and timestamp;
//! if the table was reset elsewhere in the meantime, nothing is deleted.

use crate::collector::SensorCache;
use crate::core::export::{ExportReport, Exporter, RolloverOutcome};
use crate::core::queue::{QueueError, WriteQueue};
use crate::core::record::{Record, Status};
use crate::status::StatusSource;
use crate::storage::SqliteStore;
use crate::transparency::SharedTransparencyLog;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CycleConfig {
    /// Row count that triggers a rollover
    pub export_threshold: u64,
    /// How long a tick waits for the writer before checking the count
    pub flush_timeout: Duration,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            export_threshold: crate::config::DEFAULT_EXPORT_THRESHOLD,
            flush_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum RolloverState {
    Idle,
    /// Export written; rows up to this id still need deleting, as long as
    /// that row still carries `timestamp`.
    ResetPending { through_id: i64, timestamp: String },
}

/// What happened to the threshold check on one tick.
#[derive(Debug)]
pub enum RolloverReport {
    Completed(ExportReport),
    /// Export written, reset deferred to a later tick.
    ResetDeferred(ExportReport),
    /// Export failed; rows kept for a later attempt.
    Failed(String),
    /// A previously deferred reset finished.
    PendingResetCleared { deleted: usize },
}

#[derive(Debug)]
pub struct TickReport {
    pub sequence: Option<u64>,
    pub status: Status,
    pub record: Record,
    /// Row count observed after the flush; `None` if it could not be read
    pub row_count: Option<u64>,
    pub rollover: Option<RolloverReport>,
}

pub struct CollectionCycle {
    sensors: SensorCache,
    status: Box<dyn StatusSource>,
    queue: WriteQueue,
    store: Arc<SqliteStore>,
    exporter: Exporter,
    config: CycleConfig,
    state: RolloverState,
    log: SharedTransparencyLog,
}

impl CollectionCycle {
    /// Build a cycle and start its record writer.
    pub fn new(
        sensors: SensorCache,
        status: Box<dyn StatusSource>,
        store: Arc<SqliteStore>,
        exporter: Exporter,
        log: SharedTransparencyLog,
        config: CycleConfig,
    ) -> std::io::Result<Self> {
        let queue = WriteQueue::new(Arc::clone(&store), Arc::clone(&log))?;
        Ok(Self {
            sensors,
            status,
            queue,
            store,
            exporter,
            config,
            state: RolloverState::Idle,
            log,
        })
    }

    /// Run one tick. Never fails: every error is logged and the next tick
    /// proceeds normally.
    pub fn tick(&mut self) -> TickReport {
        self.log.record_tick();

        let status = self.status.current();
        self.sensors.refresh();
        let snapshot = self.sensors.snapshot();
        let record = Record::from_snapshot(&snapshot, status);

        tracing::debug!("Collecting: {}", record.describe());

        let sequence = match self.queue.enqueue(record) {
            Ok(sequence) => {
                self.log.record_enqueued();
                Some(sequence)
            }
            Err(e) => {
                tracing::error!(error = %e, "Could not enqueue record: {}", record.describe());
                None
            }
        };

        match self.queue.flush(self.config.flush_timeout) {
            Ok(()) => {}
            Err(QueueError::FlushTimeout(t)) => {
                tracing::warn!(timeout = ?t, pending = self.queue.pending(), "Writer is behind");
            }
            Err(e) => tracing::error!(error = %e, "Write queue unavailable"),
        }

        let (row_count, rollover) = self.check_threshold();

        TickReport {
            sequence,
            status,
            record,
            row_count,
            rollover,
        }
    }

    /// Roll over now regardless of the threshold.
    pub fn force_rollover(&mut self) -> Option<RolloverReport> {
        if let Err(e) = self.queue.flush(self.config.flush_timeout) {
            tracing::warn!(error = %e, "Rolling over with records still queued");
        }
        let cleared = self.finish_pending_reset();
        if self.has_pending_reset() {
            return cleared;
        }
        self.rollover().or(cleared)
    }

    fn check_threshold(&mut self) -> (Option<u64>, Option<RolloverReport>) {
        let cleared = self.finish_pending_reset();
        if self.has_pending_reset() {
            // Exported rows are still in the store; exporting now would
            // duplicate them.
            return (None, cleared);
        }

        let count = match self.store.count() {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read row count");
                return (None, cleared);
            }
        };
        tracing::debug!(count, threshold = self.config.export_threshold, "Row count");

        if count < self.config.export_threshold {
            return (Some(count), cleared);
        }

        (Some(count), self.rollover().or(cleared))
    }

    fn rollover(&mut self) -> Option<RolloverReport> {
        match self.exporter.rollover(&self.store) {
            Ok(RolloverOutcome::Completed(report)) => {
                self.log.record_export(report.rows as u64);
                Some(RolloverReport::Completed(report))
            }
            Ok(RolloverOutcome::ResetFailed { report, error }) => {
                self.log.record_export(report.rows as u64);
                if let (Some(through_id), Some(timestamp)) =
                    (report.last_id, report.last_timestamp.clone())
                {
                    tracing::warn!(
                        through_id,
                        error = %error,
                        "Deferring reset of exported rows"
                    );
                    self.state = RolloverState::ResetPending {
                        through_id,
                        timestamp,
                    };
                }
                Some(RolloverReport::ResetDeferred(report))
            }
            Ok(RolloverOutcome::Empty) => None,
            Err(e) => {
                self.log.record_export_failure();
                tracing::error!(error = %e, "Export failed, keeping rows for next attempt");
                Some(RolloverReport::Failed(e.to_string()))
            }
        }
    }

    fn finish_pending_reset(&mut self) -> Option<RolloverReport> {
        let RolloverState::ResetPending {
            through_id,
            ref timestamp,
        } = self.state
        else {
            return None;
        };

        match self.store.delete_exported(through_id, timestamp) {
            Ok(Some(deleted)) => {
                tracing::info!(through_id, deleted, "Deferred reset completed");
                self.state = RolloverState::Idle;
                Some(RolloverReport::PendingResetCleared { deleted })
            }
            Ok(None) => {
                tracing::info!(through_id, "Exported rows already removed by another reset");
                self.state = RolloverState::Idle;
                Some(RolloverReport::PendingResetCleared { deleted: 0 })
            }
            Err(e) => {
                tracing::warn!(through_id, error = %e, "Deferred reset failed again");
                None
            }
        }
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    /// Whether exported rows are still waiting to be deleted.
    pub fn has_pending_reset(&self) -> bool {
        self.state != RolloverState::Idle
    }

    /// Let the writer finish queued records and stop it.
    pub fn shutdown(self) {
        self.queue.shutdown();
    }
}
