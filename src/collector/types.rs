//! Sensor reading types delivered by a sensor source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The four sensor channels sampled by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorChannel {
    /// Ambient light (lux)
    Light,
    /// Proximity (cm, or a near/far value on binary sensors)
    Proximity,
    /// Acceleration along x/y/z (m/s²)
    Accelerometer,
    /// Angular velocity along x/y/z (rad/s)
    Gyroscope,
}

impl SensorChannel {
    pub const ALL: [SensorChannel; 4] = [
        SensorChannel::Light,
        SensorChannel::Proximity,
        SensorChannel::Accelerometer,
        SensorChannel::Gyroscope,
    ];

    /// Number of values a reading on this channel carries.
    pub fn arity(&self) -> usize {
        match self {
            SensorChannel::Light | SensorChannel::Proximity => 1,
            SensorChannel::Accelerometer | SensorChannel::Gyroscope => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SensorChannel::Light => "light",
            SensorChannel::Proximity => "proximity",
            SensorChannel::Accelerometer => "accelerometer",
            SensorChannel::Gyroscope => "gyroscope",
        }
    }
}

/// A single event from a sensor source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorReading {
    /// Timestamp when the reading was delivered
    pub timestamp: DateTime<Utc>,
    pub channel: SensorChannel,
    pub values: Vec<f32>,
}

impl SensorReading {
    pub fn new(channel: SensorChannel, values: Vec<f32>) -> Self {
        Self {
            timestamp: Utc::now(),
            channel,
            values,
        }
    }

    pub fn light(lux: f32) -> Self {
        Self::new(SensorChannel::Light, vec![lux])
    }

    pub fn proximity(distance: f32) -> Self {
        Self::new(SensorChannel::Proximity, vec![distance])
    }

    pub fn accelerometer(x: f32, y: f32, z: f32) -> Self {
        Self::new(SensorChannel::Accelerometer, vec![x, y, z])
    }

    pub fn gyroscope(x: f32, y: f32, z: f32) -> Self {
        Self::new(SensorChannel::Gyroscope, vec![x, y, z])
    }

    /// Whether the reading carries enough values for its channel.
    pub fn is_complete(&self) -> bool {
        self.values.len() >= self.channel.arity()
    }
}

/// Latest value of every channel at one instant.
///
/// Channels that never reported keep `0.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub light: f32,
    pub proximity: f32,
    pub accelerometer: [f32; 3],
    pub gyroscope: [f32; 3],
}
