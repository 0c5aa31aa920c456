//! Policy rules and the gate that evaluates them.
//!
//! The rule set is a closed enum — no runtime discovery. Each rule is a
//! pure predicate over (manifest, environment, now) that either passes or
//! yields a named violation.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::manifest::{DeploymentManifest, TargetEnvironment};

/// One violated rule, by name, with a human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Violation {
    pub rule: String,
    pub message: String,
}

/// Outcome of a gate evaluation. Contains the complete violation set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GateResult {
    pub violations: Vec<Violation>,
}

impl GateResult {
    /// Whether the gate passed (no violations).
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

/// The closed set of policy rules the gate can enforce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyRule {
    ResourceLimitsPresent,
    RequiredLabelsPresent,
    NoActiveFreezeWindow,
    ApprovalsRecorded,
}

impl PolicyRule {
    /// All rules, for the default gate configuration.
    pub const ALL: [PolicyRule; 4] = [
        PolicyRule::ResourceLimitsPresent,
        PolicyRule::RequiredLabelsPresent,
        PolicyRule::NoActiveFreezeWindow,
        PolicyRule::ApprovalsRecorded,
    ];

    /// Evaluate this rule. Pure: no I/O, no ordering dependence.
    pub fn evaluate(
        &self,
        manifest: &DeploymentManifest,
        env: &TargetEnvironment,
        now: u64,
    ) -> Option<Violation> {
        match self {
            PolicyRule::ResourceLimitsPresent => {
                if manifest.resources.is_none() {
                    return Some(Violation {
                        rule: "resource_limits_missing".to_string(),
                        message: format!(
                            "manifest for {} declares no resource limits",
                            manifest.service
                        ),
                    });
                }
                None
            }
            PolicyRule::RequiredLabelsPresent => {
                let missing: Vec<&str> = env
                    .required_labels
                    .iter()
                    .filter(|l| !manifest.labels.contains_key(l.as_str()))
                    .map(String::as_str)
                    .collect();
                if missing.is_empty() {
                    None
                } else {
                    Some(Violation {
                        rule: "required_label_missing".to_string(),
                        message: format!("missing required labels: {}", missing.join(", ")),
                    })
                }
            }
            PolicyRule::NoActiveFreezeWindow => {
                let active = env.freeze_windows.iter().find(|w| w.active_at(now));
                active.map(|w| Violation {
                    rule: "freeze_window_active".to_string(),
                    message: format!(
                        "environment {} is frozen until {}: {}",
                        env.name, w.end, w.reason
                    ),
                })
            }
            PolicyRule::ApprovalsRecorded => {
                let mut approvers: Vec<&str> = manifest
                    .approvals
                    .iter()
                    .map(|a| a.approver.as_str())
                    .collect();
                approvers.sort_unstable();
                approvers.dedup();
                let got = approvers.len() as u32;
                if got < env.required_approvals {
                    Some(Violation {
                        rule: "approvals_missing".to_string(),
                        message: format!(
                            "{} of {} required approvals recorded",
                            got, env.required_approvals
                        ),
                    })
                } else {
                    None
                }
            }
        }
    }
}

/// The pre-deploy gate: a configured list of policy rules.
///
/// All configured rules are evaluated on every call — never fail-fast —
/// so the caller sees the complete violation set in one response.
#[derive(Debug, Clone)]
pub struct PreDeployGate {
    rules: Vec<PolicyRule>,
}

impl Default for PreDeployGate {
    fn default() -> Self {
        Self {
            rules: PolicyRule::ALL.to_vec(),
        }
    }
}

impl PreDeployGate {
    /// Build a gate with an explicit rule list.
    pub fn new(rules: Vec<PolicyRule>) -> Self {
        Self { rules }
    }

    /// Evaluate every configured rule against the manifest and environment.
    pub fn evaluate(
        &self,
        manifest: &DeploymentManifest,
        env: &TargetEnvironment,
        now: u64,
    ) -> GateResult {
        let mut violations = Vec::new();
        for rule in &self.rules {
            match rule.evaluate(manifest, env, now) {
                Some(v) => {
                    debug!(rule = %v.rule, message = %v.message, "gate rule violated");
                    violations.push(v);
                }
                None => debug!(rule = ?rule, "gate rule passed"),
            }
        }

        if violations.is_empty() {
            info!(
                service = %manifest.service,
                environment = %env.name,
                rules = self.rules.len(),
                "pre-deploy gate passed"
            );
        } else {
            warn!(
                service = %manifest.service,
                environment = %env.name,
                violations = violations.len(),
                "pre-deploy gate blocked rollout"
            );
        }

        GateResult { violations }
    }
}
