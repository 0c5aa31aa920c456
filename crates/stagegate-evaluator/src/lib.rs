//! stagegate-evaluator — canary evaluation for StageGate.
//!
//! Turns a stage's metric thresholds plus the latest windowed summaries
//! into a Promote/Hold/Rollback decision:
//!
//! - Each window is classified Pass/Fail/Indeterminate per metric using
//!   the threshold's comparator and tolerance band.
//! - A single window breaching the band by the configured hard multiple
//!   fast-fails the metric: immediate Rollback, independent of the
//!   consecutive-window rule.
//! - A metric is stage-healthy only after K consecutive Pass windows;
//!   Fail and Indeterminate both reset the counter (nothing averages
//!   out).
//! - Promote requires every metric stage-healthy and the stage minimum
//!   duration elapsed; Rollback wins over Hold wins over Promote.
//!
//! Confidence (fraction of K satisfied) is carried on verdicts for
//! observability only; it is never a decision input.

pub mod evaluator;
pub mod threshold;
pub mod tracker;

pub use evaluator::{Evaluation, EvaluatorConfig, StageEvaluator};
pub use threshold::{WindowCheck, classify};
pub use tracker::WindowTracker;
