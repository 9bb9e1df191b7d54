//! Wall-clock timing of pricing runs.

use std::time::{Duration, Instant};

/// Start/end timestamps of the most recent run.
///
/// Overwritten by every run; reports zero before the first one completes.
#[derive(Clone, Copy, Debug, Default)]
pub struct RunTimer {
    start: Option<Instant>,
    end: Option<Instant>,
}

impl RunTimer {
    /// Creates a timer with no recorded run.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the start of a run and clears the previous end mark.
    #[inline]
    pub fn start(&mut self) {
        self.start = Some(Instant::now());
        self.end = None;
    }

    /// Marks the end of the current run.
    #[inline]
    pub fn stop(&mut self) {
        self.end = Some(Instant::now());
    }

    /// Duration of the last completed run.
    pub fn elapsed(&self) -> Duration {
        match (self.start, self.end) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            _ => Duration::ZERO,
        }
    }

    /// Duration of the last completed run in microseconds.
    #[inline]
    pub fn elapsed_micros(&self) -> u128 {
        self.elapsed().as_micros()
    }
}
