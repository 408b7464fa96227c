//! Pause/resume time accounting
//!
//! Time does not advance on the output timeline while paused: every span
//! between a pause and the matching resume is accumulated and subtracted
//! from later presentation times by the muxer's retiming step.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Point-in-time view of the pause state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PauseAccounting {
    pub is_paused: bool,
    pub accumulated_paused_duration: Duration,
    /// Host time the current pause began at
    pub paused_at: Option<Duration>,
}

impl PauseAccounting {
    /// Total paused time as of `now`, including a pause still in progress
    pub fn paused_total(&self, now: Duration) -> Duration {
        let current = match self.paused_at {
            Some(start) if self.is_paused => now.saturating_sub(start),
            _ => Duration::ZERO,
        };
        self.accumulated_paused_duration + current
    }
}

/// Shared pause state, read by capture threads and written by the controller
#[derive(Debug, Clone, Default)]
pub struct PauseClock {
    inner: Arc<Mutex<PauseAccounting>>,
}

impl PauseClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a pause at host time `now`. Returns false if already paused.
    pub fn pause(&self, now: Duration) -> bool {
        let mut state = self.inner.lock();
        if state.is_paused {
            return false;
        }
        state.is_paused = true;
        state.paused_at = Some(now);
        true
    }

    /// End the current pause at host time `now`, returning its length
    pub fn resume(&self, now: Duration) -> Option<Duration> {
        let mut state = self.inner.lock();
        if !state.is_paused {
            return None;
        }
        let span = state
            .paused_at
            .take()
            .map(|start| now.saturating_sub(start))
            .unwrap_or_default();
        state.accumulated_paused_duration += span;
        state.is_paused = false;
        Some(span)
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().is_paused
    }

    pub fn snapshot(&self) -> PauseAccounting {
        *self.inner.lock()
    }
}
