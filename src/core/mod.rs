//! Core pipeline for the sleep monitor agent.
//!
//! This module contains:
//! - The record data model
//! - The single-writer queue feeding the store
//! - CSV export and rollover
//! - The per-tick collection cycle

pub mod cycle;
pub mod export;
pub mod queue;
pub mod record;

// Re-export commonly used types
pub use cycle::{CollectionCycle, CycleConfig, RolloverReport, TickReport};
pub use export::{ExportError, ExportReport, Exporter, RolloverOutcome};
pub use queue::{QueueEntry, QueueError, RecordSink, WriteQueue};
pub use record::{Record, Status, StoredRow, CSV_HEADER};
