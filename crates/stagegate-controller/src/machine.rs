//! The rollout transition table.
//!
//! Pure functions over `Rollout`: no I/O, no clocks beyond the caller's
//! timestamp. The coordinator persists the returned `TransitionEvent`
//! and mirrors it to the audit sink; nothing else may mutate a rollout's
//! status or stage index.

use tracing::debug;

use stagegate_state::{Rollout, RolloutStatus, TransitionEvent};

use crate::error::{ControllerError, ControllerResult};

/// Whether `from -> to` is a legal edge of the rollout state machine.
fn allowed(from: RolloutStatus, to: RolloutStatus) -> bool {
    use RolloutStatus::*;
    matches!(
        (from, to),
        (Pending, Validating)
            | (Validating, Progressing)
            | (Validating, Failed)
            | (Progressing, Paused)
            | (Progressing, Promoted)
            | (Progressing, RolledBack)
            | (Progressing, Failed)
            | (Paused, Progressing)
            // Abort from Paused goes straight down the rollback path.
            | (Paused, RolledBack)
            | (Paused, Failed)
    )
}

/// Apply a status transition, recording it for the audit trail.
pub fn transition(
    rollout: &mut Rollout,
    to: RolloutStatus,
    now: u64,
    reason: &str,
) -> ControllerResult<TransitionEvent> {
    let from = rollout.status;
    if !allowed(from, to) {
        return Err(ControllerError::InvalidTransition {
            id: rollout.id.clone(),
            from,
            to,
        });
    }
    rollout.status = to;
    rollout.updated_at = now;
    debug!(rollout = %rollout.id, %from, %to, %reason, "transition applied");
    Ok(TransitionEvent {
        rollout_id: rollout.id.clone(),
        from,
        to,
        timestamp: now,
        reason: reason.to_string(),
    })
}

/// Advance to the next stage. Legal only while Progressing and never on
/// the last stage; the stage index is strictly increasing.
pub fn advance_stage(rollout: &mut Rollout, now: u64) -> ControllerResult<()> {
    if rollout.status != RolloutStatus::Progressing {
        return Err(ControllerError::InvalidTransition {
            id: rollout.id.clone(),
            from: rollout.status,
            to: RolloutStatus::Progressing,
        });
    }
    if rollout.on_last_stage() {
        return Err(ControllerError::InvalidTransition {
            id: rollout.id.clone(),
            from: rollout.status,
            to: RolloutStatus::Promoted,
        });
    }
    rollout.current_stage += 1;
    rollout.updated_at = now;
    debug!(rollout = %rollout.id, stage = rollout.current_stage, "stage advanced");
    Ok(())
}

/// Validate a stage list at rollout-creation time: non-empty, weights
/// within 0–100 and non-decreasing (the active weight never moves down
/// except through rollback).
pub fn validate_stages(id: &str, stages: &[stagegate_state::StageSpec]) -> ControllerResult<()> {
    if stages.is_empty() {
        return Err(ControllerError::NoStages(id.to_string()));
    }
    let mut prev = 0u32;
    for (i, stage) in stages.iter().enumerate() {
        if stage.traffic_weight > 100 {
            return Err(ControllerError::InvalidStageWeights(format!(
                "stage {i} weight {} exceeds 100",
                stage.traffic_weight
            )));
        }
        if stage.traffic_weight < prev {
            return Err(ControllerError::InvalidStageWeights(format!(
                "stage {i} weight {} below previous {prev}",
                stage.traffic_weight
            )));
        }
        prev = stage.traffic_weight;
    }
    Ok(())
}
