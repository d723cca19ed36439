//! Latest-value cache fed by a sensor source over a channel.
//!
//! Sources push readings whenever they fire; the cache only applies them when
//! the collection cycle calls [`SensorCache::refresh`], so a snapshot is a
//! consistent view of everything delivered up to that point.

use crate::collector::types::{SensorChannel, SensorReading, SensorSnapshot};
use crossbeam_channel::Receiver;

pub struct SensorCache {
    receiver: Receiver<SensorReading>,
    latest: SensorSnapshot,
    /// Readings dropped because they carried too few values
    malformed: u64,
}

impl SensorCache {
    pub fn new(receiver: Receiver<SensorReading>) -> Self {
        Self {
            receiver,
            latest: SensorSnapshot::default(),
            malformed: 0,
        }
    }

    /// Apply every pending reading. Returns how many were applied.
    pub fn refresh(&mut self) -> usize {
        let pending: Vec<SensorReading> = self.receiver.try_iter().collect();
        let mut applied = 0;
        for reading in pending {
            if self.apply(&reading) {
                applied += 1;
            }
        }
        applied
    }

    /// Last write wins per channel.
    pub fn apply(&mut self, reading: &SensorReading) -> bool {
        if !reading.is_complete() {
            self.malformed += 1;
            tracing::debug!(
                channel = reading.channel.name(),
                values = reading.values.len(),
                "Dropping incomplete sensor reading"
            );
            return false;
        }

        let v = &reading.values;
        match reading.channel {
            SensorChannel::Light => self.latest.light = v[0],
            SensorChannel::Proximity => self.latest.proximity = v[0],
            SensorChannel::Accelerometer => self.latest.accelerometer = [v[0], v[1], v[2]],
            SensorChannel::Gyroscope => self.latest.gyroscope = [v[0], v[1], v[2]],
        }
        true
    }

    pub fn snapshot(&self) -> SensorSnapshot {
        self.latest
    }

    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }
}
