//! Stage evaluator — aggregates per-metric window checks into a decision.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use stagegate_signals::WindowSnapshot;
use stagegate_state::{Decision, MetricFinding, StageSpec, WindowClass};

use crate::threshold::classify;
use crate::tracker::WindowTracker;

/// Evaluator tuning. Thresholds themselves live on the stage spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// A single window breaching the tolerance band by this multiple
    /// triggers an immediate rollback recommendation.
    pub hard_fail_multiple: f64,
    /// Rollback when a metric's Fail ratio over the horizon exceeds this.
    pub fail_ratio_ceiling: f64,
    /// Window count backing the fail-ratio ceiling.
    pub horizon: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            hard_fail_multiple: 3.0,
            fail_ratio_ceiling: 0.5,
            horizon: 10,
        }
    }
}

/// One evaluation cycle's outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub decision: Decision,
    pub findings: Vec<MetricFinding>,
    /// Mean per-metric confidence. Observability only.
    pub confidence: f64,
    pub reason: String,
}

/// Evaluates one stage of one rollout across polling windows.
///
/// Holds per-metric consecutive-window trackers; the controller builds a
/// fresh evaluator when a rollout enters a new stage.
pub struct StageEvaluator {
    config: EvaluatorConfig,
    stage: StageSpec,
    trackers: HashMap<String, WindowTracker>,
}

impl StageEvaluator {
    pub fn new(stage: StageSpec, config: EvaluatorConfig) -> Self {
        let trackers = stage
            .thresholds
            .iter()
            .map(|t| {
                (
                    t.metric.clone(),
                    WindowTracker::new(stage.required_healthy_windows, config.horizon),
                )
            })
            .collect();
        Self {
            config,
            stage,
            trackers,
        }
    }

    /// Names of the metrics this stage evaluates, in threshold order.
    pub fn metric_names(&self) -> Vec<String> {
        self.stage.thresholds.iter().map(|t| t.metric.clone()).collect()
    }

    /// Feed one window snapshot and produce this cycle's decision.
    ///
    /// `min_elapsed` is whether the stage's minimum duration has passed;
    /// promotion is impossible before it has.
    pub fn observe(&mut self, snapshot: &WindowSnapshot, min_elapsed: bool) -> Evaluation {
        let mut findings = Vec::with_capacity(self.stage.thresholds.len());
        let mut fast_failed: Option<(String, f64)> = None;
        let mut ceiling_breached: Option<(String, f64)> = None;
        let mut data_gaps: Vec<String> = Vec::new();

        for threshold in &self.stage.thresholds {
            let check = match snapshot.metric(&threshold.metric) {
                Some(window) => classify(
                    threshold,
                    &window.candidate,
                    &window.baseline,
                    self.config.hard_fail_multiple,
                ),
                None => {
                    // The aggregator did not produce this metric at all.
                    crate::threshold::WindowCheck {
                        class: WindowClass::Indeterminate,
                        deviation: 0.0,
                        fast_fail: false,
                        note: Some(format!("{}: metric absent from window", threshold.metric)),
                    }
                }
            };

            let tracker = self
                .trackers
                .get_mut(&threshold.metric)
                .unwrap_or_else(|| unreachable!("tracker exists for every threshold"));
            tracker.record(check.class);

            if check.fast_fail && fast_failed.is_none() {
                fast_failed = Some((threshold.metric.clone(), check.deviation));
            }
            let ratio = tracker.fail_ratio();
            if ratio > self.config.fail_ratio_ceiling && ceiling_breached.is_none() {
                ceiling_breached = Some((threshold.metric.clone(), ratio));
            }
            if let Some(note) = &check.note {
                data_gaps.push(note.clone());
            }

            findings.push(MetricFinding {
                metric: threshold.metric.clone(),
                class: check.class,
                deviation: check.deviation,
                consecutive_passes: tracker.consecutive_passes(),
                confidence: tracker.confidence(),
            });
        }

        let confidence = if findings.is_empty() {
            0.0
        } else {
            findings.iter().map(|f| f.confidence).sum::<f64>() / findings.len() as f64
        };

        // Rollback > Hold > Promote.
        let (decision, reason) = if let Some((metric, deviation)) = fast_failed {
            warn!(window = snapshot.window_id, %metric, deviation, "fast-fail breach");
            (
                Decision::Rollback,
                format!("fast_fail:{metric} breached tolerance band by {deviation:.4}"),
            )
        } else if let Some((metric, ratio)) = ceiling_breached {
            warn!(window = snapshot.window_id, %metric, ratio, "fail-ratio ceiling breached");
            (
                Decision::Rollback,
                format!(
                    "fail_ratio:{metric} at {ratio:.2} exceeds ceiling {:.2}",
                    self.config.fail_ratio_ceiling
                ),
            )
        } else if self.all_healthy() && min_elapsed {
            (
                Decision::Promote,
                format!(
                    "all {} metrics healthy for {} consecutive windows",
                    findings.len(),
                    self.stage.required_healthy_windows
                ),
            )
        } else if !data_gaps.is_empty() {
            (
                Decision::Hold,
                format!("insufficient data: {}", data_gaps.join("; ")),
            )
        } else if self.all_healthy() {
            (
                Decision::Hold,
                "minimum stage duration not yet elapsed".to_string(),
            )
        } else {
            (
                Decision::Hold,
                "awaiting consecutive healthy windows".to_string(),
            )
        };

        debug!(
            window = snapshot.window_id,
            ?decision,
            confidence,
            %reason,
            "stage evaluated"
        );

        Evaluation {
            decision,
            findings,
            confidence,
            reason,
        }
    }

    fn all_healthy(&self) -> bool {
        !self.trackers.is_empty() && self.trackers.values().all(WindowTracker::is_healthy)
    }
}
