//! Record types flowing through the logging pipeline.
//!
//! A [`Record`] is built once per tick from the latest sensor values and the
//! current status flag. It carries no timestamp: the store assigns ordering
//! and time when the record becomes a [`StoredRow`].

use crate::collector::SensorSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Header line of every exported CSV file.
pub const CSV_HEADER: &str = "Id,Timestamp,Light,Proximity,AccelerometerX,AccelerometerY,AccelerometerZ,GyroscopeX,GyroscopeY,GyroscopeZ,Status";

/// User-reported state attached to each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Awake,
    Sleeping,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Awake => "awake",
            Status::Sleeping => "sleeping",
        }
    }

    /// Parse a persisted flag. Anything that is not `sleeping` reads as awake,
    /// including empty or missing values.
    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag.map(|s| s.trim().to_lowercase()) {
            Some(s) if s == "sleeping" => Status::Sleeping,
            _ => Status::Awake,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tick's worth of raw sensor values plus the status label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub brightness: f32,
    pub proximity: f32,
    pub acc_x: f32,
    pub acc_y: f32,
    pub acc_z: f32,
    pub gyro_x: f32,
    pub gyro_y: f32,
    pub gyro_z: f32,
    pub status: Status,
}

impl Record {
    /// Build a record from a sensor snapshot.
    pub fn from_snapshot(snapshot: &SensorSnapshot, status: Status) -> Self {
        Self {
            brightness: snapshot.light,
            proximity: snapshot.proximity,
            acc_x: snapshot.accelerometer[0],
            acc_y: snapshot.accelerometer[1],
            acc_z: snapshot.accelerometer[2],
            gyro_x: snapshot.gyroscope[0],
            gyro_y: snapshot.gyroscope[1],
            gyro_z: snapshot.gyroscope[2],
            status,
        }
    }

    /// Field dump used in logs and the failure log.
    pub fn describe(&self) -> String {
        format!(
            "Brightness={}, Prox={}, AccX={}, AccY={}, AccZ={}, GyroX={}, GyroY={}, GyroZ={}, Status={}",
            self.brightness,
            self.proximity,
            self.acc_x,
            self.acc_y,
            self.acc_z,
            self.gyro_x,
            self.gyro_y,
            self.gyro_z,
            self.status
        )
    }
}

/// A record as persisted in the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub id: i64,
    /// `YYYY-MM-DD HH:MM:SS`
    pub timestamp: String,
    pub record: Record,
}

impl StoredRow {
    /// Comma-joined representation matching [`CSV_HEADER`].
    pub fn to_csv_line(&self) -> String {
        let r = &self.record;
        format!(
            "{},{},{},{},{},{},{},{},{},{},{}",
            self.id,
            self.timestamp,
            r.brightness,
            r.proximity,
            r.acc_x,
            r.acc_y,
            r.acc_z,
            r.gyro_x,
            r.gyro_y,
            r.gyro_z,
            r.status
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_flag() {
        assert_eq!(Status::from_flag(Some("sleeping")), Status::Sleeping);
        assert_eq!(Status::from_flag(Some(" Sleeping ")), Status::Sleeping);
        assert_eq!(Status::from_flag(Some("awake")), Status::Awake);
        assert_eq!(Status::from_flag(Some("")), Status::Awake);
        assert_eq!(Status::from_flag(None), Status::Awake);
    }

    #[test]
    fn test_record_from_snapshot() {
        let snapshot = SensorSnapshot {
            light: 12.5,
            proximity: 5.0,
            accelerometer: [0.1, 0.2, 9.8],
            gyroscope: [0.01, 0.02, 0.03],
        };
        let record = Record::from_snapshot(&snapshot, Status::Sleeping);
        assert_eq!(record.brightness, 12.5);
        assert_eq!(record.acc_z, 9.8);
        assert_eq!(record.gyro_y, 0.02);
        assert_eq!(record.status, Status::Sleeping);
    }

    #[test]
    fn test_csv_line_matches_header_width() {
        let row = StoredRow {
            id: 7,
            timestamp: "2024-01-22 10:00:00".to_string(),
            record: Record::from_snapshot(&SensorSnapshot::default(), Status::Awake),
        };
        let line = row.to_csv_line();
        assert_eq!(line, "7,2024-01-22 10:00:00,0,0,0,0,0,0,0,0,awake");
        assert_eq!(
            line.split(',').count(),
            CSV_HEADER.split(',').count()
        );
    }
}
