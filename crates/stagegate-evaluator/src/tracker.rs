//! Consecutive-window tracking per metric.

use std::collections::VecDeque;

use stagegate_state::WindowClass;

/// Tracks window classifications for a single metric within a stage.
///
/// A metric is stage-healthy only after K consecutive Pass windows; any
/// Fail or Indeterminate resets the counter to zero. A bounded history
/// of recent windows backs the Fail-ratio ceiling check.
#[derive(Debug)]
pub struct WindowTracker {
    /// K: consecutive passes required for stage health.
    required: u32,
    /// Evaluation horizon for the fail-ratio ceiling.
    horizon: usize,
    consecutive_passes: u32,
    recent: VecDeque<WindowClass>,
}

impl WindowTracker {
    pub fn new(required: u32, horizon: usize) -> Self {
        Self {
            required,
            horizon: horizon.max(1),
            consecutive_passes: 0,
            recent: VecDeque::with_capacity(horizon.max(1)),
        }
    }

    /// Record one window's classification.
    pub fn record(&mut self, class: WindowClass) {
        match class {
            WindowClass::Pass => self.consecutive_passes += 1,
            WindowClass::Fail | WindowClass::Indeterminate => self.consecutive_passes = 0,
        }
        if self.recent.len() == self.horizon {
            self.recent.pop_front();
        }
        self.recent.push_back(class);
    }

    /// K consecutive Pass windows reached.
    pub fn is_healthy(&self) -> bool {
        self.consecutive_passes >= self.required
    }

    pub fn consecutive_passes(&self) -> u32 {
        self.consecutive_passes
    }

    /// Fraction of K already satisfied. Observability only.
    pub fn confidence(&self) -> f64 {
        if self.required == 0 {
            return 1.0;
        }
        f64::from(self.consecutive_passes.min(self.required)) / f64::from(self.required)
    }

    /// Fraction of Fail windows over the horizon, once the horizon has
    /// filled. Returns 0 before that so one early failure cannot trip
    /// the ceiling on its own.
    pub fn fail_ratio(&self) -> f64 {
        if self.recent.len() < self.horizon {
            return 0.0;
        }
        let fails = self
            .recent
            .iter()
            .filter(|c| **c == WindowClass::Fail)
            .count();
        fails as f64 / self.recent.len() as f64
    }
}
