//! stagegate-gate — pre-deploy validation for StageGate.
//!
//! The gate runs a closed, explicitly enumerated set of policy rules
//! against a deployment manifest and its target environment before a
//! rollout may be created. Rules are independent and order-independent;
//! all of them are evaluated and every violation is reported together in
//! one `GateResult`. Any violation blocks rollout creation entirely —
//! the gate fails closed.

pub mod manifest;
pub mod rules;

pub use manifest::{Approval, DeploymentManifest, FreezeWindow, ResourceLimits, TargetEnvironment};
pub use rules::{GateResult, PolicyRule, PreDeployGate, Violation};
