//! stagegate-signals — telemetry windowing for StageGate.
//!
//! The aggregator polls the external telemetry collaborator once per
//! window, per configured metric, per cohort (baseline, candidate), and
//! reduces raw samples to summary statistics (mean, p50/p95/p99, sample
//! count).
//!
//! Two degradation rules hold everywhere:
//!
//! - A window with fewer samples than the configured minimum yields
//!   `WindowStats::Insufficient`, never a number. Missing telemetry is
//!   not an error; the evaluator folds it into an Indeterminate window.
//! - A telemetry call that times out or fails transiently is retried
//!   with bounded exponential backoff; after the bound it also degrades
//!   to `Insufficient`. It is never treated as a verdict input.

pub mod aggregator;
pub mod source;

pub use aggregator::{
    AggregatorConfig, InsufficientReason, MetricWindow, SignalAggregator, WindowSnapshot,
    WindowStats,
};
pub use source::{BoxFuture, MemorySource, TelemetryError, TelemetrySource, TimeRange};
