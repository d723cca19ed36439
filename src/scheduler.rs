//! Periodic tick driver.
//!
//! Fires a callback roughly every `interval`. Ticks that fall behind are
//! coalesced rather than queued, so a slow tick delays the next one instead
//! of causing a burst. The host can suspend ticking through the pause probe
//! and stop the loop through a [`StopHandle`]; a tick already running is
//! always allowed to finish.

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use std::time::Duration;

/// Stops a running [`Scheduler`].
#[derive(Debug, Clone)]
pub struct StopHandle {
    sender: Sender<()>,
}

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.sender.try_send(());
    }
}

/// Counts from one scheduler run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerRun {
    pub fired: u64,
    pub skipped_paused: u64,
}

pub struct Scheduler {
    interval: Duration,
    fire_immediately: bool,
    stop: Receiver<()>,
}

impl Scheduler {
    pub fn new(interval: Duration) -> (Self, StopHandle) {
        let (sender, stop) = bounded(1);
        (
            Self {
                interval,
                fire_immediately: true,
                stop,
            },
            StopHandle { sender },
        )
    }

    /// Wait a full interval before the first tick.
    pub fn delay_first_tick(mut self) -> Self {
        self.fire_immediately = false;
        self
    }

    /// Run until stopped. `is_paused` is consulted before every tick.
    pub fn run<P, F>(&self, mut is_paused: P, mut on_tick: F) -> SchedulerRun
    where
        P: FnMut() -> bool,
        F: FnMut(),
    {
        let mut run = SchedulerRun::default();
        let ticker = tick(self.interval);

        if self.fire_immediately {
            if self.stop.try_recv().is_ok() {
                return run;
            }
            self.fire(&mut run, &mut is_paused, &mut on_tick);
        }

        loop {
            select! {
                recv(ticker) -> _ => self.fire(&mut run, &mut is_paused, &mut on_tick),
                recv(self.stop) -> _ => break,
            }
        }

        tracing::debug!(fired = run.fired, skipped = run.skipped_paused, "Scheduler stopped");
        run
    }

    fn fire<P, F>(&self, run: &mut SchedulerRun, is_paused: &mut P, on_tick: &mut F)
    where
        P: FnMut() -> bool,
        F: FnMut(),
    {
        if is_paused() {
            run.skipped_paused += 1;
            tracing::debug!("Collection paused, skipping tick");
            return;
        }
        run.fired += 1;
        on_tick();
    }
}
