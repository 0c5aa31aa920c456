//! Per-window threshold classification.

use stagegate_state::{CompareMode, Comparator, MetricThreshold, Statistic, SummaryStats, WindowClass};
use stagegate_signals::WindowStats;

/// Baseline statistics below this magnitude cannot anchor a relative
/// comparison.
const BASELINE_EPSILON: f64 = 1e-9;

/// Outcome of classifying one metric over one window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowCheck {
    pub class: WindowClass,
    /// Signed breach past the threshold in the comparator's bad
    /// direction. Negative or zero means within the threshold.
    pub deviation: f64,
    /// The breach exceeded the tolerance band by the hard multiple.
    pub fast_fail: bool,
    /// Why the window was indeterminate, when it was.
    pub note: Option<String>,
}

impl WindowCheck {
    fn indeterminate(note: String) -> Self {
        Self {
            class: WindowClass::Indeterminate,
            deviation: 0.0,
            fast_fail: false,
            note: Some(note),
        }
    }
}

/// Classify one metric window against its threshold.
///
/// Band semantics: breach ≤ 0 is a Pass; a breach inside the tolerance
/// band is Indeterminate (inconclusive, resets the consecutive counter);
/// past the band is a Fail; past the band by `hard_fail_multiple` is a
/// fast-fail.
pub fn classify(
    threshold: &MetricThreshold,
    candidate: &WindowStats,
    baseline: &WindowStats,
    hard_fail_multiple: f64,
) -> WindowCheck {
    let Some(candidate_stats) = candidate.stats() else {
        let reason = match candidate {
            WindowStats::Insufficient(r) => r.to_string(),
            WindowStats::Computed(_) => unreachable!(),
        };
        return WindowCheck::indeterminate(format!("{}: {reason}", threshold.metric));
    };
    let value = pick(candidate_stats, threshold.statistic);

    let breach = match threshold.mode {
        CompareMode::Absolute => match threshold.comparator {
            Comparator::Below => value - threshold.threshold,
            Comparator::Above => threshold.threshold - value,
        },
        CompareMode::RelativeToBaseline => {
            let Some(baseline_stats) = baseline.stats() else {
                return WindowCheck::indeterminate(format!(
                    "{}: no baseline statistics for relative comparison",
                    threshold.metric
                ));
            };
            let base = pick(baseline_stats, threshold.statistic);
            if base.abs() < BASELINE_EPSILON {
                return WindowCheck::indeterminate(format!(
                    "{}: baseline statistic is zero",
                    threshold.metric
                ));
            }
            let relative = match threshold.comparator {
                Comparator::Below => (value - base) / base,
                Comparator::Above => (base - value) / base,
            };
            relative - threshold.threshold
        }
    };

    // A zero tolerance collapses the band: any breach is both a Fail
    // and a fast-fail.
    let fast_fail = breach > threshold.tolerance * hard_fail_multiple;
    let class = if breach <= 0.0 {
        WindowClass::Pass
    } else if breach <= threshold.tolerance && !fast_fail {
        WindowClass::Indeterminate
    } else {
        WindowClass::Fail
    };

    WindowCheck {
        class,
        deviation: breach,
        fast_fail,
        note: None,
    }
}

fn pick(stats: &SummaryStats, statistic: Statistic) -> f64 {
    match statistic {
        Statistic::Mean => stats.mean,
        Statistic::P50 => stats.p50,
        Statistic::P95 => stats.p95,
        Statistic::P99 => stats.p99,
    }
}
