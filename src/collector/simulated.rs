//! Simulated sensor source.
//!
//! Desktop hosts have no light, proximity or motion sensors, so this source
//! stands in for the platform sensor framework: one thread per enabled
//! channel emits readings on its own cadence. Disabled channels never report,
//! which is how an absent sensor looks to the rest of the pipeline.

use crate::collector::types::{SensorChannel, SensorReading};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Which channels the source provides, and how often.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub capture_light: bool,
    pub capture_proximity: bool,
    pub capture_accelerometer: bool,
    pub capture_gyroscope: bool,
    /// Base sampling period; each channel jitters around it
    pub sample_interval: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            capture_light: true,
            capture_proximity: true,
            capture_accelerometer: true,
            capture_gyroscope: true,
            sample_interval: Duration::from_millis(200),
        }
    }
}

impl CollectorConfig {
    pub fn enabled_channels(&self) -> Vec<SensorChannel> {
        SensorChannel::ALL
            .into_iter()
            .filter(|c| match c {
                SensorChannel::Light => self.capture_light,
                SensorChannel::Proximity => self.capture_proximity,
                SensorChannel::Accelerometer => self.capture_accelerometer,
                SensorChannel::Gyroscope => self.capture_gyroscope,
            })
            .collect()
    }
}

/// Errors that can occur while running the source.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Collector is already running")]
    AlreadyRunning,
    #[error("Failed to spawn sensor thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub struct SimulatedCollector {
    config: CollectorConfig,
    sender: Sender<SensorReading>,
    receiver: Receiver<SensorReading>,
    running: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl SimulatedCollector {
    pub fn new(config: CollectorConfig) -> Self {
        let (sender, receiver) = bounded(10_000);
        Self {
            config,
            sender,
            receiver,
            running: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
        }
    }

    /// Start emitting readings.
    pub fn start(&mut self) -> Result<(), CollectorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CollectorError::AlreadyRunning);
        }

        for (i, channel) in self.config.enabled_channels().into_iter().enumerate() {
            let sender = self.sender.clone();
            let receiver = self.receiver.clone();
            let running = Arc::clone(&self.running);
            // Offset cadences so channels fire independently.
            let period = self.config.sample_interval + Duration::from_millis(37 * i as u64);

            let handle = thread::Builder::new()
                .name(format!("sensor-{}", channel.name()))
                .spawn(move || emit_loop(channel, period, sender, receiver, running));

            match handle {
                Ok(h) => self.workers.push(h),
                Err(e) => {
                    self.stop();
                    return Err(e.into());
                }
            }
        }

        tracing::info!(
            channels = ?self.config.enabled_channels(),
            "Simulated sensor source started"
        );
        Ok(())
    }

    /// Stop emitting readings and join the channel threads.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Receiver side, handed to the sensor cache.
    pub fn receiver(&self) -> &Receiver<SensorReading> {
        &self.receiver
    }
}

impl Drop for SimulatedCollector {
    fn drop(&mut self) {
        self.stop();
    }
}

fn emit_loop(
    channel: SensorChannel,
    period: Duration,
    sender: Sender<SensorReading>,
    receiver: Receiver<SensorReading>,
    running: Arc<AtomicBool>,
) {
    let origin = Instant::now();
    while running.load(Ordering::SeqCst) {
        let t = origin.elapsed().as_secs_f32();
        if !offer(&sender, &receiver, synthesize(channel, t)) {
            break;
        }
        thread::sleep(period);
    }
}

/// Send `reading`, evicting the oldest queued reading if the channel is
/// full. Returns `false` once the channel is disconnected.
fn offer(
    sender: &Sender<SensorReading>,
    receiver: &Receiver<SensorReading>,
    reading: SensorReading,
) -> bool {
    match sender.try_send(reading) {
        Ok(()) => true,
        Err(TrySendError::Full(reading)) => {
            let _ = receiver.try_recv();
            if sender.try_send(reading).is_err() {
                tracing::trace!("Sensor channel still full, reading dropped");
            }
            true
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}

/// Plausible, slowly varying values for a phone lying on a bedside table.
fn synthesize(channel: SensorChannel, t: f32) -> SensorReading {
    match channel {
        SensorChannel::Light => SensorReading::light(40.0 + 35.0 * (t / 90.0).sin()),
        SensorChannel::Proximity => {
            SensorReading::proximity(if (t / 30.0).sin() > 0.8 { 0.0 } else { 5.0 })
        }
        SensorChannel::Accelerometer => SensorReading::accelerometer(
            0.05 * (t * 1.3).sin(),
            0.05 * (t * 0.7).cos(),
            9.81 + 0.02 * (t * 2.1).sin(),
        ),
        SensorChannel::Gyroscope => SensorReading::gyroscope(
            0.01 * (t * 0.9).sin(),
            0.01 * (t * 1.1).cos(),
            0.005 * (t * 0.5).sin(),
        ),
    }
}
