//! Deployment backend and audit sink collaborator seams.
//!
//! Both traits are dyn-safe so the coordinator and executor hold
//! `Arc<dyn ...>`. In-memory implementations back the tests and the
//! simulator; the audit sink additionally ships a tracing-based sink for
//! plain deployments.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use stagegate_signals::BoxFuture;
use stagegate_state::{RolloutId, TransitionEvent, Verdict};

/// Errors from the deployment backend.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// Timeout or server error; eligible for bounded retry.
    #[error("transient backend failure: {0}")]
    Transient(String),

    /// The backend rejected the mutation outright.
    #[error("permanent backend failure: {0}")]
    Permanent(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Traffic weights for the two cohorts. Weights sum to 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSplit {
    pub baseline_weight: u32,
    pub candidate_weight: u32,
}

impl TrafficSplit {
    /// All traffic on the baseline.
    pub fn all_baseline() -> Self {
        Self {
            baseline_weight: 100,
            candidate_weight: 0,
        }
    }

    /// Candidate at `weight`, remainder on the baseline.
    pub fn candidate_at(weight: u32) -> Self {
        let weight = weight.min(100);
        Self {
            baseline_weight: 100 - weight,
            candidate_weight: weight,
        }
    }
}

/// External deployment backend that owns the actual traffic routing.
pub trait TrafficBackend: Send + Sync {
    fn get_traffic_split(
        &self,
        rollout_id: &str,
    ) -> BoxFuture<'_, Result<TrafficSplit, BackendError>>;

    fn set_traffic_split(
        &self,
        rollout_id: &str,
        split: TrafficSplit,
    ) -> BoxFuture<'_, Result<(), BackendError>>;
}

/// Events the core emits to the audit/notification sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    Transition(TransitionEvent),
    Verdict(Verdict),
    /// Actionable operator alert. Raised only for gate rejections and
    /// rollback exhaustion.
    Alert { rollout_id: RolloutId, message: String },
}

/// Append-only audit/notification sink. Write-only from the core's
/// perspective.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Audit sink that logs every event through `tracing`.
#[derive(Debug, Default)]
pub struct LogSink;

impl AuditSink for LogSink {
    fn record(&self, event: AuditEvent) {
        match &event {
            AuditEvent::Transition(t) => info!(
                rollout = %t.rollout_id,
                from = %t.from,
                to = %t.to,
                reason = %t.reason,
                "transition"
            ),
            AuditEvent::Verdict(v) => info!(
                rollout = %v.rollout_id,
                stage = v.stage,
                decision = ?v.decision,
                confidence = v.confidence,
                reason = %v.reason,
                "verdict"
            ),
            AuditEvent::Alert { rollout_id, message } => warn!(
                rollout = %rollout_id,
                %message,
                "operator alert"
            ),
        }
    }
}

/// In-memory audit sink for tests and the simulator.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn alerts(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                AuditEvent::Alert { message, .. } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }
}

impl AuditSink for MemorySink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// In-memory deployment backend with failure injection, for tests and
/// the simulator.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    splits: Mutex<HashMap<String, TrafficSplit>>,
    set_calls: AtomicU32,
    fail_next_sets: Mutex<u32>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the split for a rollout.
    pub fn seed(&self, rollout_id: &str, split: TrafficSplit) {
        self.splits
            .lock()
            .unwrap()
            .insert(rollout_id.to_string(), split);
    }

    /// Current split as the backend sees it.
    pub fn split(&self, rollout_id: &str) -> Option<TrafficSplit> {
        self.splits.lock().unwrap().get(rollout_id).copied()
    }

    /// Total `set_traffic_split` mutations issued (successful ones).
    pub fn set_calls(&self) -> u32 {
        self.set_calls.load(Ordering::Relaxed)
    }

    /// Make the next `n` set calls fail transiently.
    pub fn fail_next_sets(&self, n: u32) {
        *self.fail_next_sets.lock().unwrap() = n;
    }
}

impl TrafficBackend for MemoryBackend {
    fn get_traffic_split(
        &self,
        rollout_id: &str,
    ) -> BoxFuture<'_, Result<TrafficSplit, BackendError>> {
        let rollout_id = rollout_id.to_string();
        Box::pin(async move {
            self.splits
                .lock()
                .unwrap()
                .get(&rollout_id)
                .copied()
                .ok_or_else(|| BackendError::Permanent(format!("unknown rollout {rollout_id}")))
        })
    }

    fn set_traffic_split(
        &self,
        rollout_id: &str,
        split: TrafficSplit,
    ) -> BoxFuture<'_, Result<(), BackendError>> {
        let rollout_id = rollout_id.to_string();
        Box::pin(async move {
            {
                let mut failures = self.fail_next_sets.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(BackendError::Transient("injected failure".to_string()));
                }
            }
            self.splits.lock().unwrap().insert(rollout_id, split);
            self.set_calls.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }
}
