//! Transparency module for the sleep monitor agent.
//!
//! Tracks what the pipeline collected, stored, lost and exported.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, PersistedStats, SharedTransparencyLog,
    TransparencyLog, TransparencyStats,
};
