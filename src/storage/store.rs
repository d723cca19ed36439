//! SQLite-backed persistent store for sensor records.
//!
//! The store owns a single connection behind a mutex. All writes go through
//! [`SqliteStore::insert`], which assigns the row timestamp itself and never
//! returns an error: a record it cannot persist after every strategy is
//! written to the [`FailureLog`] and dropped.
//!
//! # Insert policy
//!
//! Strategies are tried in order:
//!
//! 1. [`InsertStrategy::Sequenced`]: compute the next logical timestamp from
//!    the previous row and write it explicitly.
//! 2. [`InsertStrategy::SqliteClock`]: let SQLite compute the timestamp from
//!    its own clock and the previous row, for when the previous timestamp
//!    cannot be read back.
//!
//! Every timestamp is UTC. The configured timezone only affects export
//! filenames.
//!
//! A busy or locked database is not a failure of the strategy: the same
//! strategy is retried after [`RetryPolicy::lock_retry_interval_ms`], up to
//! [`RetryPolicy::max_lock_retries`] times across the whole insert.

use crate::core::queue::RecordSink;
use crate::core::record::{Record, Status, StoredRow};
use crate::storage::failure_log::FailureLog;
use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use thiserror::Error;

pub const TABLE_NAME: &str = "sleep_data";

/// Format of the `timestamp` column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const CREATE_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS sleep_data (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now')),
        brightness REAL,
        proximity REAL,
        accx REAL,
        accy REAL,
        accz REAL,
        gyrox REAL,
        gyroy REAL,
        gyroz REAL,
        status TEXT
    );
";

/// How the primary insert strategy picks a row timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampMode {
    /// Previous row + 1 second, or now (UTC) when the table is empty.
    #[default]
    Sequential,
    /// Now, bumped to previous row + 1 second if the clock has not advanced.
    WallClock,
}

/// Bounded retry on a busy database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub lock_retry_interval_ms: u64,
    pub max_lock_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            lock_retry_interval_ms: 100,
            max_lock_retries: 50,
        }
    }
}

impl RetryPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.lock_retry_interval_ms)
    }
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub retry: RetryPolicy,
    pub timestamp_mode: TimestampMode,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timestamp_mode: TimestampMode::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertStrategy {
    Sequenced,
    SqliteClock,
}

impl InsertStrategy {
    pub const ORDER: [InsertStrategy; 2] = [InsertStrategy::Sequenced, InsertStrategy::SqliteClock];

    fn label(&self) -> &'static str {
        match self {
            InsertStrategy::Sequenced => "sequenced",
            InsertStrategy::SqliteClock => "sqlite clock",
        }
    }
}

/// Result of an insert. Never an error: losses are logged, not raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted {
        id: i64,
        strategy: InsertStrategy,
        lock_retries: u32,
    },
    Lost {
        lock_retries: u32,
    },
}

impl InsertOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted { .. })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Unreadable timestamp in previous row: {0:?}")]
    Timestamp(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether another connection is holding the database.
    pub fn is_busy(&self) -> bool {
        match self {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => {
                matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
            }
            _ => false,
        }
    }
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
    failure_log: FailureLog,
    options: StoreOptions,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(
        path: &Path,
        failure_log: FailureLog,
        options: StoreOptions,
    ) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn, failure_log, options)
    }

    pub fn open_in_memory(
        failure_log: FailureLog,
        options: StoreOptions,
    ) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, failure_log, options)
    }

    fn with_connection(
        conn: Connection,
        failure_log: FailureLog,
        options: StoreOptions,
    ) -> Result<Self, StoreError> {
        // Busy handling is ours; SQLite must report contention immediately.
        conn.busy_timeout(Duration::ZERO)?;
        conn.execute_batch(CREATE_TABLE)?;
        Ok(Self {
            conn: Mutex::new(conn),
            failure_log,
            options,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave a transaction open:
        // rusqlite rolls back on drop.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn failure_log(&self) -> &FailureLog {
        &self.failure_log
    }

    /// Persist one record, retrying on contention and falling back to the
    /// SQLite-computed timestamp if the sequenced insert fails.
    pub fn insert(&self, record: &Record) -> InsertOutcome {
        let retry = &self.options.retry;
        let mut lock_retries = 0;
        let mut last_error: Option<StoreError> = None;

        for strategy in InsertStrategy::ORDER {
            loop {
                // Released before sleeping so readers are not starved.
                let result = {
                    let mut conn = self.lock();
                    self.try_insert(&mut conn, record, strategy)
                };

                match result {
                    Ok(id) => {
                        tracing::debug!(
                            id,
                            strategy = strategy.label(),
                            lock_retries,
                            "Record inserted: {}",
                            record.describe()
                        );
                        return InsertOutcome::Inserted {
                            id,
                            strategy,
                            lock_retries,
                        };
                    }
                    Err(e) if e.is_busy() && lock_retries < retry.max_lock_retries => {
                        lock_retries += 1;
                        tracing::debug!(attempt = lock_retries, "Database busy, retrying insert");
                        thread::sleep(retry.interval());
                    }
                    Err(e) => {
                        tracing::warn!(
                            strategy = strategy.label(),
                            error = %e,
                            "Insert strategy failed"
                        );
                        last_error = Some(e);
                        break;
                    }
                }
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        tracing::error!(
            lock_retries,
            error = %reason,
            "Record lost after all insert strategies: {}",
            record.describe()
        );
        self.failure_log.append(&format!(
            "Failed to insert record after {} attempts: {} - Error: {}",
            InsertStrategy::ORDER.len(),
            record.describe(),
            reason
        ));
        InsertOutcome::Lost { lock_retries }
    }

    fn try_insert(
        &self,
        conn: &mut Connection,
        record: &Record,
        strategy: InsertStrategy,
    ) -> Result<i64, StoreError> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let r = record;

        match strategy {
            InsertStrategy::Sequenced => {
                let timestamp = self.next_timestamp(&tx)?;
                tx.execute(
                    "INSERT INTO sleep_data
                        (timestamp, brightness, proximity, accx, accy, accz, gyrox, gyroy, gyroz, status)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        timestamp,
                        r.brightness as f64,
                        r.proximity as f64,
                        r.acc_x as f64,
                        r.acc_y as f64,
                        r.acc_z as f64,
                        r.gyro_x as f64,
                        r.gyro_y as f64,
                        r.gyro_z as f64,
                        r.status.as_str(),
                    ],
                )?;
            }
            InsertStrategy::SqliteClock => {
                // max(now, previous + 1s); an unreadable previous value counts as absent.
                tx.execute(
                    "INSERT INTO sleep_data
                        (timestamp, brightness, proximity, accx, accy, accz, gyrox, gyroy, gyroz, status)
                     VALUES (
                        max(
                            strftime('%Y-%m-%d %H:%M:%S', 'now'),
                            COALESCE(
                                (SELECT strftime('%Y-%m-%d %H:%M:%S', timestamp, '+1 second')
                                 FROM sleep_data ORDER BY id DESC LIMIT 1),
                                ''
                            )
                        ),
                        ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        r.brightness as f64,
                        r.proximity as f64,
                        r.acc_x as f64,
                        r.acc_y as f64,
                        r.acc_z as f64,
                        r.gyro_x as f64,
                        r.gyro_y as f64,
                        r.gyro_z as f64,
                        r.status.as_str(),
                    ],
                )?;
            }
        }

        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    fn next_timestamp(&self, conn: &Connection) -> Result<String, StoreError> {
        let previous: Option<Option<String>> = conn
            .query_row(
                "SELECT timestamp FROM sleep_data ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let now = Utc::now().naive_utc();

        let next = match previous {
            None => now,
            Some(previous) => {
                let text = previous.unwrap_or_default();
                let previous = NaiveDateTime::parse_from_str(&text, TIMESTAMP_FORMAT)
                    .map_err(|_| StoreError::Timestamp(text.clone()))?;
                let bumped = previous + chrono::Duration::seconds(1);
                match self.options.timestamp_mode {
                    TimestampMode::Sequential => bumped,
                    TimestampMode::WallClock => bumped.max(now),
                }
            }
        };

        Ok(next.format(TIMESTAMP_FORMAT).to_string())
    }

    /// Current row count.
    pub fn count(&self) -> Result<u64, StoreError> {
        let conn = self.lock();
        count_rows(&conn)
    }

    /// Every row in ascending id order.
    pub fn rows(&self) -> Result<Vec<StoredRow>, StoreError> {
        let conn = self.lock();
        read_rows(&conn)
    }

    /// Every row as a comma-joined line, ascending id order.
    pub fn read_all(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.rows()?.iter().map(StoredRow::to_csv_line).collect())
    }

    /// Drop and recreate the table.
    pub fn reset(&self) -> Result<(), StoreError> {
        self.begin_rollover()?.reset()
    }

    /// Finish a rollover whose reset failed after the export succeeded:
    /// delete rows up to and including `through_id`, provided that row still
    /// carries `timestamp`.
    ///
    /// Returns `None` without deleting anything when the marker row is gone
    /// or was replaced, which means the table was reset in the meantime and
    /// the remaining rows were never exported.
    pub fn delete_exported(
        &self,
        through_id: i64,
        timestamp: &str,
    ) -> Result<Option<usize>, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let marker: Option<Option<String>> = tx
            .query_row(
                "SELECT timestamp FROM sleep_data WHERE id = ?1",
                params![through_id],
                |row| row.get(0),
            )
            .optional()?;

        match marker {
            Some(current) if current.as_deref().unwrap_or_default() == timestamp => {
                let deleted =
                    tx.execute("DELETE FROM sleep_data WHERE id <= ?1", params![through_id])?;
                tx.commit()?;
                Ok(Some(deleted))
            }
            _ => Ok(None),
        }
    }

    /// Hold the store for an export-then-reset sequence. No insert, from
    /// this process or another, can land between reading the rows and
    /// resetting the table while the guard lives.
    pub fn begin_rollover(&self) -> Result<RolloverGuard<'_>, StoreError> {
        let conn = self.lock();
        conn.execute_batch("BEGIN IMMEDIATE;")?;
        Ok(RolloverGuard {
            conn,
            committed: false,
        })
    }
}

impl RecordSink for SqliteStore {
    fn insert(&self, record: &Record) -> InsertOutcome {
        SqliteStore::insert(self, record)
    }
}

/// Exclusive access to the store for the duration of a rollover.
///
/// Dropping the guard without calling [`RolloverGuard::reset`] rolls back and
/// leaves every row in place.
pub struct RolloverGuard<'a> {
    conn: MutexGuard<'a, Connection>,
    committed: bool,
}

impl RolloverGuard<'_> {
    pub fn rows(&self) -> Result<Vec<StoredRow>, StoreError> {
        read_rows(&self.conn)
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        count_rows(&self.conn)
    }

    /// Drop and recreate the table, then release the store.
    pub fn reset(mut self) -> Result<(), StoreError> {
        recreate_table(&self.conn)?;
        self.conn.execute_batch("COMMIT;")?;
        self.committed = true;
        tracing::info!("Store reset: table {TABLE_NAME} recreated");
        Ok(())
    }
}

impl Drop for RolloverGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = self.conn.execute_batch("ROLLBACK;") {
                tracing::warn!(error = %e, "Rollover rollback failed");
            }
        }
    }
}

fn count_rows(conn: &Connection) -> Result<u64, StoreError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM sleep_data", [], |row| row.get(0))?;
    Ok(count.max(0) as u64)
}

fn read_rows(conn: &Connection) -> Result<Vec<StoredRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, timestamp, brightness, proximity, accx, accy, accz, gyrox, gyroy, gyroz, status
         FROM sleep_data ORDER BY id ASC",
    )?;

    let rows = stmt
        .query_map([], |row| {
            let status: Option<String> = row.get(10)?;
            Ok(StoredRow {
                id: row.get(0)?,
                timestamp: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                record: Record {
                    brightness: real(row, 2)?,
                    proximity: real(row, 3)?,
                    acc_x: real(row, 4)?,
                    acc_y: real(row, 5)?,
                    acc_z: real(row, 6)?,
                    gyro_x: real(row, 7)?,
                    gyro_y: real(row, 8)?,
                    gyro_z: real(row, 9)?,
                    status: Status::from_flag(status.as_deref()),
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn real(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<f32> {
    Ok(row.get::<_, Option<f64>>(idx)?.unwrap_or(0.0) as f32)
}

fn recreate_table(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {TABLE_NAME};"))?;
    conn.execute_batch(CREATE_TABLE)?;
    Ok(())
}
