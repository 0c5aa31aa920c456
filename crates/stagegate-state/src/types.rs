//! Domain types for the StageGate state store.
//!
//! These types represent the persisted state of rollouts, stage
//! definitions, evaluator verdicts, rollback actions, and the transition
//! audit trail. All types are serializable to/from JSON for storage in
//! redb tables.

use serde::{Deserialize, Serialize};

/// Unique identifier for a rollout.
pub type RolloutId = String;

// ── Rollout ───────────────────────────────────────────────────────

/// One managed progressive deployment of a candidate version against
/// a baseline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rollout {
    pub id: RolloutId,
    pub service: String,
    pub baseline_version: String,
    pub candidate_version: String,
    /// Ordered traffic stages. Never empty for a created rollout.
    pub stages: Vec<StageSpec>,
    /// Index into `stages`. Non-decreasing while status is Progressing.
    pub current_stage: usize,
    pub status: RolloutStatus,
    /// Unix timestamp (seconds) when this rollout was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last status change.
    pub updated_at: u64,
}

impl Rollout {
    /// The stage definition at the current index, if any.
    pub fn active_stage(&self) -> Option<&StageSpec> {
        self.stages.get(self.current_stage)
    }

    /// Whether the current stage is the final one.
    pub fn on_last_stage(&self) -> bool {
        self.current_stage + 1 >= self.stages.len()
    }
}

/// Lifecycle status of a rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStatus {
    Pending,
    Validating,
    Progressing,
    Paused,
    Promoted,
    RolledBack,
    Failed,
}

impl RolloutStatus {
    /// Terminal statuses admit no further mutation except archival.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Promoted | Self::RolledBack | Self::Failed)
    }
}

impl std::fmt::Display for RolloutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Validating => "validating",
            Self::Progressing => "progressing",
            Self::Paused => "paused",
            Self::Promoted => "promoted",
            Self::RolledBack => "rolled_back",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ── Stage ─────────────────────────────────────────────────────────

/// A configured traffic-weight/duration/threshold tier within a rollout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageSpec {
    /// Target traffic weight for the candidate cohort (0–100).
    pub traffic_weight: u32,
    /// Minimum time in the stage before promotion is possible.
    pub min_duration_secs: u64,
    /// Safety timeout: exceeding this forces a rollback.
    pub max_duration_secs: u64,
    /// Consecutive healthy windows (K) required per metric.
    pub required_healthy_windows: u32,
    /// Per-metric thresholds evaluated each polling window.
    pub thresholds: Vec<MetricThreshold>,
}

/// Which summary statistic a threshold compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    Mean,
    P50,
    P95,
    P99,
}

/// Direction in which a metric must stay relative to its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    /// The statistic must stay at or below the threshold (error rate, latency).
    Below,
    /// The statistic must stay at or above the threshold (throughput).
    Above,
}

/// How the candidate statistic is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompareMode {
    /// Compare the candidate statistic directly against the threshold.
    #[default]
    Absolute,
    /// Compare the candidate's relative deviation from the baseline
    /// cohort; the threshold expresses the allowed relative deviation.
    RelativeToBaseline,
}

/// A single golden-signal threshold (metric name, comparator, threshold,
/// tolerance band).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricThreshold {
    pub metric: String,
    pub statistic: Statistic,
    pub comparator: Comparator,
    pub threshold: f64,
    /// Width of the tolerance band past the threshold. Breaches inside
    /// the band are inconclusive; breaches past it are failures.
    pub tolerance: f64,
    #[serde(default)]
    pub mode: CompareMode,
}

// ── Signals ───────────────────────────────────────────────────────

/// Which population a telemetry sample was drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cohort {
    Baseline,
    Candidate,
}

impl std::fmt::Display for Cohort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Baseline => f.write_str("baseline"),
            Self::Candidate => f.write_str("candidate"),
        }
    }
}

/// A raw telemetry sample as returned by the telemetry collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalSample {
    pub metric: String,
    pub timestamp: u64,
    pub value: f64,
    pub cohort: Cohort,
    pub window_id: u64,
}

/// Summary statistics for one metric/cohort over one polling window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryStats {
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub sample_count: usize,
}

// ── Verdicts ──────────────────────────────────────────────────────

/// The evaluator's per-cycle decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Promote,
    Hold,
    Rollback,
}

/// Classification of one metric over one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowClass {
    Pass,
    Fail,
    Indeterminate,
}

/// Per-metric evidence attached to a verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricFinding {
    pub metric: String,
    pub class: WindowClass,
    /// Signed breach past the threshold (comparator direction).
    pub deviation: f64,
    /// Consecutive passing windows so far.
    pub consecutive_passes: u32,
    /// Fraction of K satisfied. Observability only, never a decision input.
    pub confidence: f64,
}

/// One immutable entry in a rollout's verdict history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verdict {
    pub rollout_id: RolloutId,
    pub stage: usize,
    pub timestamp: u64,
    pub decision: Decision,
    pub findings: Vec<MetricFinding>,
    /// Mean per-metric confidence. Observability only.
    pub confidence: f64,
    pub reason: String,
}

// ── Rollback ──────────────────────────────────────────────────────

/// Outcome of a remediation attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackOutcome {
    Pending,
    Retrying,
    Success,
    Failed,
}

/// Record of one rollback remediation. At most one is in flight per
/// rollout at any time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RollbackAction {
    pub rollout_id: RolloutId,
    pub reason: String,
    pub attempts: u32,
    pub outcome: RollbackOutcome,
    pub started_at: u64,
    pub finished_at: Option<u64>,
}

impl RollbackAction {
    /// Whether this action is still in flight.
    pub fn in_flight(&self) -> bool {
        matches!(self.outcome, RollbackOutcome::Pending | RollbackOutcome::Retrying)
    }
}

// ── Audit ─────────────────────────────────────────────────────────

/// One entry in a rollout's transition audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionEvent {
    pub rollout_id: RolloutId,
    pub from: RolloutStatus,
    pub to: RolloutStatus,
    pub timestamp: u64,
    pub reason: String,
}
