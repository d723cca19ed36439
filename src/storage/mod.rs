//! Durable storage for collected records.

pub mod failure_log;
pub mod store;

pub use failure_log::FailureLog;
pub use store::{
    InsertOutcome, InsertStrategy, RetryPolicy, RolloverGuard, SqliteStore, StoreError,
    StoreOptions, TimestampMode, TIMESTAMP_FORMAT,
};
