//! TOML configuration for a stagegated run.
//!
//! A single file describes the rollout (service, versions, stages and
//! their thresholds), the deployment manifest and target environment
//! for the pre-deploy gate, control-plane tuning, and the simulated
//! telemetry profile.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use stagegate_controller::ControlConfig;
use stagegate_gate::{DeploymentManifest, TargetEnvironment};
use stagegate_state::StageSpec;

use crate::sim::TelemetryProfile;

#[derive(Debug, Deserialize)]
pub struct DaemonConfig {
    pub rollout: RolloutConfig,
    pub manifest: DeploymentManifest,
    pub environment: TargetEnvironment,
    #[serde(default)]
    pub control: ControlSection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

#[derive(Debug, Deserialize)]
pub struct RolloutConfig {
    pub id: String,
    pub service: String,
    pub baseline_version: String,
    pub candidate_version: String,
    pub stages: Vec<StageSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlSection {
    pub poll_interval_secs: u64,
    pub min_samples: usize,
    pub hard_fail_multiple: f64,
    pub fail_ratio_ceiling: f64,
    pub fail_ratio_horizon: usize,
    pub rollback_max_attempts: u32,
}

impl Default for ControlSection {
    fn default() -> Self {
        let defaults = ControlConfig::default();
        Self {
            poll_interval_secs: defaults.poll_interval.as_secs(),
            min_samples: defaults.aggregator.min_samples,
            hard_fail_multiple: defaults.evaluator.hard_fail_multiple,
            fail_ratio_ceiling: defaults.evaluator.fail_ratio_ceiling,
            fail_ratio_horizon: defaults.evaluator.horizon,
            rollback_max_attempts: defaults.executor.max_attempts,
        }
    }
}

impl ControlSection {
    pub fn to_control_config(&self) -> ControlConfig {
        let mut config = ControlConfig::default();
        config.poll_interval = Duration::from_secs(self.poll_interval_secs);
        config.aggregator.min_samples = self.min_samples;
        config.evaluator.hard_fail_multiple = self.hard_fail_multiple;
        config.evaluator.fail_ratio_ceiling = self.fail_ratio_ceiling;
        config.evaluator.horizon = self.fail_ratio_horizon;
        config.executor.max_attempts = self.rollback_max_attempts;
        config
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TelemetrySection {
    pub profile: TelemetryProfile,
    /// Steady error rate reported by the baseline cohort.
    pub base_error_rate: f64,
    /// Steady p99 latency (ms) reported by the baseline cohort.
    pub base_latency_ms: f64,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            profile: TelemetryProfile::Healthy,
            base_error_rate: 0.2,
            base_latency_ms: 120.0,
        }
    }
}

impl DaemonConfig {
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
        if config.rollout.stages.is_empty() {
            anyhow::bail!("rollout must declare at least one stage");
        }
        Ok(config)
    }
}
