//! Sensor collection for the sleep monitor agent.
//!
//! A sensor source pushes [`SensorReading`]s into a channel at its own pace;
//! the [`SensorCache`] keeps the latest value per channel for the collection
//! cycle to snapshot.

pub mod cache;
pub mod simulated;
pub mod types;

// Re-export commonly used types
pub use cache::SensorCache;
pub use simulated::{CollectorConfig, CollectorError, SimulatedCollector};
pub use types::{SensorChannel, SensorReading, SensorSnapshot};

/// Platform-agnostic collector type alias
pub type Collector = SimulatedCollector;
