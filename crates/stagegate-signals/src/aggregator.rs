//! Signal aggregator — reduces raw telemetry to windowed summaries.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use stagegate_state::{Cohort, SummaryStats};

use crate::source::{TelemetryError, TelemetrySource, TimeRange};

/// Aggregator tuning.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Minimum samples before a statistic is considered computed.
    pub min_samples: usize,
    /// Timeout per telemetry query.
    pub query_timeout: Duration,
    /// Retries per query on transient failure.
    pub max_retries: u32,
    /// Base backoff between retries; doubles per attempt.
    pub retry_backoff: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            min_samples: 20,
            query_timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

/// Why a window's statistic could not be computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsufficientReason {
    /// Telemetry returned zero samples.
    NoSamples,
    /// Fewer samples than the configured minimum.
    BelowMinimum { got: usize, need: usize },
    /// The telemetry source stayed unavailable past the retry bound.
    SourceUnavailable,
}

impl std::fmt::Display for InsufficientReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSamples => f.write_str("no samples"),
            Self::BelowMinimum { got, need } => write!(f, "{got} of {need} required samples"),
            Self::SourceUnavailable => f.write_str("telemetry source unavailable"),
        }
    }
}

/// The computed (or degraded) statistics for one metric/cohort/window.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowStats {
    Computed(SummaryStats),
    Insufficient(InsufficientReason),
}

impl WindowStats {
    /// The summary statistics, when computed.
    pub fn stats(&self) -> Option<&SummaryStats> {
        match self {
            Self::Computed(s) => Some(s),
            Self::Insufficient(_) => None,
        }
    }
}

/// Both cohorts' window statistics for one metric.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricWindow {
    pub metric: String,
    pub baseline: WindowStats,
    pub candidate: WindowStats,
}

/// All configured metrics for one polling window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSnapshot {
    pub window_id: u64,
    pub range: TimeRange,
    pub metrics: Vec<MetricWindow>,
}

impl WindowSnapshot {
    /// Look up one metric's window by name.
    pub fn metric(&self, name: &str) -> Option<&MetricWindow> {
        self.metrics.iter().find(|m| m.metric == name)
    }
}

/// Windows raw telemetry into per-cohort per-metric summary statistics.
pub struct SignalAggregator {
    source: Arc<dyn TelemetrySource>,
    config: AggregatorConfig,
}

impl SignalAggregator {
    pub fn new(source: Arc<dyn TelemetrySource>, config: AggregatorConfig) -> Self {
        Self { source, config }
    }

    /// Collect one window across all configured metrics and both cohorts.
    ///
    /// Never fails: transient telemetry trouble degrades the affected
    /// entries to `WindowStats::Insufficient`.
    pub async fn collect(
        &self,
        metrics: &[String],
        window_id: u64,
        range: TimeRange,
    ) -> WindowSnapshot {
        let mut out = Vec::with_capacity(metrics.len());
        for metric in metrics {
            let baseline = self.collect_one(metric, Cohort::Baseline, range).await;
            let candidate = self.collect_one(metric, Cohort::Candidate, range).await;
            out.push(MetricWindow {
                metric: metric.clone(),
                baseline,
                candidate,
            });
        }
        debug!(window_id, metrics = out.len(), "window collected");
        WindowSnapshot {
            window_id,
            range,
            metrics: out,
        }
    }

    /// One metric/cohort query with bounded timeout and backoff retries.
    async fn collect_one(&self, metric: &str, cohort: Cohort, range: TimeRange) -> WindowStats {
        let mut backoff = self.config.retry_backoff;
        let mut attempt = 0u32;

        loop {
            let query = self.source.query(metric, cohort, range);
            let result = match tokio::time::timeout(self.config.query_timeout, query).await {
                Ok(r) => r,
                Err(_) => Err(TelemetryError::Timeout(self.config.query_timeout)),
            };

            match result {
                Ok(samples) => return summarize(&samples, self.config.min_samples),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        warn!(
                            %metric, %cohort, attempts = attempt, error = %e,
                            "telemetry unavailable past retry bound, degrading window"
                        );
                        return WindowStats::Insufficient(InsufficientReason::SourceUnavailable);
                    }
                    debug!(%metric, %cohort, attempt, error = %e, "telemetry query retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }
}

/// Reduce samples to summary statistics, or mark the window insufficient.
fn summarize(samples: &[stagegate_state::SignalSample], min_samples: usize) -> WindowStats {
    if samples.is_empty() {
        return WindowStats::Insufficient(InsufficientReason::NoSamples);
    }
    if samples.len() < min_samples {
        return WindowStats::Insufficient(InsufficientReason::BelowMinimum {
            got: samples.len(),
            need: min_samples,
        });
    }

    let mut values: Vec<f64> = samples.iter().map(|s| s.value).collect();
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mean = values.iter().sum::<f64>() / values.len() as f64;
    WindowStats::Computed(SummaryStats {
        mean,
        p50: percentile(&values, 50.0),
        p95: percentile(&values, 95.0),
        p99: percentile(&values, 99.0),
        sample_count: values.len(),
    })
}

/// Nearest-rank percentile over a sorted slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
