//! The telemetry collaborator seam.
//!
//! `TelemetrySource` is dyn-safe (boxed futures) so the aggregator and
//! control loops can hold `Arc<dyn TelemetrySource>` without generics
//! spreading through every caller.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

use stagegate_state::{Cohort, SignalSample};

/// Boxed future used at dyn trait seams.
pub type BoxFuture<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Errors from the telemetry collaborator.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The call neither succeeded nor failed within its timeout.
    #[error("telemetry query timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The collaborator reported a transient failure.
    #[error("telemetry source unavailable: {0}")]
    Unavailable(String),
}

/// Half-open time range `[start, end)` in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: u64,
    pub end: u64,
}

impl TimeRange {
    pub fn contains(&self, ts: u64) -> bool {
        ts >= self.start && ts < self.end
    }
}

/// External telemetry collaborator.
///
/// May return an empty sequence; that is not an error.
pub trait TelemetrySource: Send + Sync {
    fn query(
        &self,
        metric: &str,
        cohort: Cohort,
        range: TimeRange,
    ) -> BoxFuture<'_, Result<Vec<SignalSample>, TelemetryError>>;
}

/// In-memory telemetry source for tests and the simulator.
///
/// Samples are keyed by (metric, cohort); `query` filters by time range.
/// A failure budget can be armed to make the next N queries fail
/// transiently, for exercising the retry path.
#[derive(Default)]
pub struct MemorySource {
    samples: Mutex<HashMap<(String, Cohort), Vec<SignalSample>>>,
    failures_remaining: Mutex<u32>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add samples for later queries.
    pub fn push_samples(&self, samples: impl IntoIterator<Item = SignalSample>) {
        let mut map = self.samples.lock().unwrap();
        for s in samples {
            map.entry((s.metric.clone(), s.cohort)).or_default().push(s);
        }
    }

    /// Make the next `n` queries fail with `Unavailable`.
    pub fn fail_next(&self, n: u32) {
        *self.failures_remaining.lock().unwrap() = n;
    }
}

impl TelemetrySource for MemorySource {
    fn query(
        &self,
        metric: &str,
        cohort: Cohort,
        range: TimeRange,
    ) -> BoxFuture<'_, Result<Vec<SignalSample>, TelemetryError>> {
        let metric = metric.to_string();
        Box::pin(async move {
            {
                let mut failures = self.failures_remaining.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(TelemetryError::Unavailable("injected failure".to_string()));
                }
            }
            let map = self.samples.lock().unwrap();
            let samples = map
                .get(&(metric, cohort))
                .map(|v| {
                    v.iter()
                        .filter(|s| range.contains(s.timestamp))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            Ok(samples)
        })
    }
}
