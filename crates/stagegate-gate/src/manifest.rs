//! Deployment manifest and target environment inputs to the gate.
//!
//! Both are plain data loaded from TOML (or JSON) files by the caller.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading manifest/environment files.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// What a deployment declares about itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentManifest {
    pub service: String,
    pub candidate_version: String,
    pub baseline_version: String,
    /// Per-instance resource limits. Required by policy in most environments.
    pub resources: Option<ResourceLimits>,
    /// Arbitrary labels (team, tier, oncall, ...).
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Approvals recorded against this deployment.
    #[serde(default)]
    pub approvals: Vec<Approval>,
}

/// Resource limits for one instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ResourceLimits {
    pub cpu_millis: u32,
    pub memory_bytes: u64,
}

/// A recorded approval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Approval {
    pub approver: String,
    /// Unix timestamp (seconds) when the approval was recorded.
    pub approved_at: u64,
}

/// Policy context for the environment a rollout targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetEnvironment {
    pub name: String,
    /// Labels that every manifest deployed here must carry.
    #[serde(default)]
    pub required_labels: Vec<String>,
    /// Distinct approvals required before deploying here.
    #[serde(default)]
    pub required_approvals: u32,
    /// Freeze windows during which no rollout may be created.
    #[serde(default)]
    pub freeze_windows: Vec<FreezeWindow>,
}

/// A window during which deployments are frozen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FreezeWindow {
    /// Unix timestamp (seconds), inclusive.
    pub start: u64,
    /// Unix timestamp (seconds), exclusive.
    pub end: u64,
    pub reason: String,
}

impl FreezeWindow {
    /// Whether the window is active at the given instant.
    pub fn active_at(&self, now: u64) -> bool {
        now >= self.start && now < self.end
    }
}

impl DeploymentManifest {
    /// Load a manifest from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, ManifestError> {
        parse_toml_file(path)
    }
}

impl TargetEnvironment {
    /// Load an environment definition from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, ManifestError> {
        parse_toml_file(path)
    }
}

fn parse_toml_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ManifestError> {
    let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ManifestError::Parse {
        path: path.display().to_string(),
        source,
    })
}
