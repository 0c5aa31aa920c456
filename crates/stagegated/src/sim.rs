//! Deterministic telemetry simulation for local runs.
//!
//! Emits `error_rate` and `latency_p99_ms` samples for both cohorts.
//! The baseline cohort is always steady; the candidate cohort follows
//! the configured profile. Jitter comes from a small multiplicative
//! congruential generator so runs are reproducible.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;

use stagegate_signals::{BoxFuture, TelemetryError, TelemetrySource, TimeRange};
use stagegate_state::{Cohort, SignalSample};

/// How the candidate cohort behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryProfile {
    /// Candidate matches the baseline. Rollouts should promote.
    Healthy,
    /// Candidate error rate and latency climb every window. Rollouts
    /// should roll back once the tolerance band is breached.
    Degraded,
    /// Candidate alternates between healthy and mildly elevated
    /// windows. Exercises Indeterminate classification and the
    /// consecutive-window reset.
    Flaky,
}

const SAMPLES_PER_WINDOW: usize = 30;

pub struct SimTelemetry {
    profile: TelemetryProfile,
    base_error_rate: f64,
    base_latency_ms: f64,
    /// Monotone window counter driving the degradation ramp.
    windows_seen: AtomicU64,
}

impl SimTelemetry {
    pub fn new(profile: TelemetryProfile, base_error_rate: f64, base_latency_ms: f64) -> Self {
        Self {
            profile,
            base_error_rate,
            base_latency_ms,
            windows_seen: AtomicU64::new(0),
        }
    }

    /// Candidate multiplier for the given window ordinal.
    fn candidate_factor(&self, window: u64) -> f64 {
        match self.profile {
            TelemetryProfile::Healthy => 1.0,
            // +40% per window, unbounded: crosses any tolerance band
            // within a handful of windows.
            TelemetryProfile::Degraded => 1.0 + 0.4 * window as f64,
            // Every third window runs hot but inside a typical band.
            TelemetryProfile::Flaky => {
                if window % 3 == 2 {
                    1.3
                } else {
                    1.0
                }
            }
        }
    }

    fn base_value(&self, metric: &str) -> Option<f64> {
        match metric {
            "error_rate" => Some(self.base_error_rate),
            "latency_p99_ms" => Some(self.base_latency_ms),
            _ => None,
        }
    }
}

impl TelemetrySource for SimTelemetry {
    fn query(
        &self,
        metric: &str,
        cohort: Cohort,
        range: TimeRange,
    ) -> BoxFuture<'_, Result<Vec<SignalSample>, TelemetryError>> {
        let metric = metric.to_string();
        Box::pin(async move {
            let Some(base) = self.base_value(&metric) else {
                return Ok(Vec::new());
            };
            // Both cohorts of both metrics are queried per window; four
            // queries advance the ramp by one.
            let window = self.windows_seen.fetch_add(1, Ordering::Relaxed) / 4;
            let factor = match cohort {
                Cohort::Baseline => 1.0,
                Cohort::Candidate => self.candidate_factor(window),
            };

            let mut rng = Lcg::new(window * 7919 + metric.len() as u64);
            let samples = (0..SAMPLES_PER_WINDOW)
                .map(|i| SignalSample {
                    metric: metric.clone(),
                    timestamp: range.start + i as u64 % range.end.saturating_sub(range.start).max(1),
                    value: base * factor * rng.jitter(),
                    cohort,
                    window_id: window,
                })
                .collect();
            Ok(samples)
        })
    }
}

/// Minimal multiplicative congruential generator, enough for ±5% jitter.
struct Lcg {
    state: u64,
}

impl Lcg {
    fn new(seed: u64) -> Self {
        Self {
            state: seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407),
        }
    }

    fn next(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state >> 33
    }

    /// Uniform multiplier in [0.95, 1.05).
    fn jitter(&mut self) -> f64 {
        0.95 + (self.next() % 1000) as f64 / 10_000.0
    }
}
