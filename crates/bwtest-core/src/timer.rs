//! Restartable wall-clock timers.

use std::time::{Duration, Instant};

#[derive(Debug, Default, Clone)]
struct TimerSlot {
    started: Option<Instant>,
    elapsed: Duration,
}

/// A set of wall-clock timers addressed by index.
///
/// Each start/stop pair adds to the timer's elapsed total until it is reset.
#[derive(Debug, Default, Clone)]
pub struct PerfTimer {
    slots: Vec<TimerSlot>,
}

impl PerfTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a timer and return its index.
    pub fn create_timer(&mut self) -> usize {
        self.slots.push(TimerSlot::default());
        self.slots.len() - 1
    }

    /// Start (or restart) timer `index`. Unknown indices are ignored.
    pub fn start_timer(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.started = Some(Instant::now());
        }
    }

    /// Stop timer `index`, adding the running interval to its total.
    pub fn stop_timer(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index)
            && let Some(started) = slot.started.take()
        {
            slot.elapsed += started.elapsed();
        }
    }

    /// Accumulated time of timer `index`, excluding a still-running interval.
    pub fn read_timer(&self, index: usize) -> Duration {
        self.slots.get(index).map(|s| s.elapsed).unwrap_or_default()
    }

    /// Clear timer `index` back to zero.
    pub fn reset_timer(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = TimerSlot::default();
        }
    }
}
