//! Sleep Monitor Agent - background sensor logger with durable buffering.
//!
//! The agent samples light, proximity, accelerometer and gyroscope readings
//! once per tick, persists them to a local SQLite database through a single
//! writer, and rolls the database over to a CSV file once a day's worth of
//! rows has accumulated.
//!
//! # Guarantees
//!
//! - **Ordered writes**: records are stored in the order they were enqueued,
//!   and no two inserts ever run at the same time
//! - **No silent loss**: a record that cannot be stored is written to the
//!   insertion failure log
//! - **Export before delete**: rows are only removed after the CSV file that
//!   contains them has been fully written
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       Sleep Monitor Agent                        │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌───────────┐   ┌─────────────┐   ┌──────────┐  │
//! │  │  Sensor   │──▶│  Sensor   │──▶│ Collection  │──▶│  Write   │  │
//! │  │  Source   │   │  Cache    │   │   Cycle     │   │  Queue   │  │
//! │  └───────────┘   └───────────┘   └─────────────┘   └──────────┘  │
//! │                        ▲               │                │        │
//! │  ┌───────────┐   ┌───────────┐         ▼                ▼        │
//! │  │ Scheduler │   │  Status   │   ┌─────────────┐   ┌──────────┐  │
//! │  │  (ticks)  │   │  Store    │   │  Exporter   │◀──│  SQLite  │  │
//! │  └───────────┘   └───────────┘   │   (CSV)     │   │  Store   │  │
//! │                                  └─────────────┘   └──────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sleep_monitor_agent::{collector, core, status, storage, transparency};
//!
//! let store = storage::SqliteStore::open(
//!     std::path::Path::new("sleep_data.db"),
//!     storage::FailureLog::new("insertion_failures.txt"),
//!     storage::StoreOptions::default(),
//! )
//! .expect("Failed to open store");
//!
//! let (tx, rx) = crossbeam_channel::unbounded();
//! let mut cycle = core::CollectionCycle::new(
//!     collector::SensorCache::new(rx),
//!     Box::new(status::FixedStatus(core::Status::Awake)),
//!     Arc::new(store),
//!     core::Exporter::new("exports", chrono_tz::Tz::UTC),
//!     transparency::create_shared_log(),
//!     core::CycleConfig::default(),
//! )
//! .expect("Failed to start writer");
//!
//! tx.send(collector::SensorReading::light(12.0)).unwrap();
//! let report = cycle.tick();
//! println!("stored rows: {:?}", report.row_count);
//! ```

pub mod collector;
pub mod config;
pub mod core;
pub mod scheduler;
pub mod status;
pub mod storage;
pub mod transparency;

// Re-export key types at crate root for convenience
pub use collector::{Collector, CollectorConfig, CollectorError, SensorCache, SensorReading};
pub use config::{Config, SourceConfig};
pub use core::{CollectionCycle, Exporter, Record, Status, WriteQueue};
pub use scheduler::{Scheduler, StopHandle};
pub use status::{FileStatusStore, StatusSource};
pub use storage::{FailureLog, SqliteStore};
pub use transparency::{SharedTransparencyLog, TransparencyLog, TransparencyStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
