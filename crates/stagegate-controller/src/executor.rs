//! Rollback executor — idempotent, retrying remediation.
//!
//! Reads the live traffic split from the deployment backend; a candidate
//! weight that is already zero is reported as Success without issuing a
//! mutation. Otherwise all traffic is directed to the baseline, retrying
//! transient backend failures with exponential backoff up to a fixed
//! bound. Exhaustion marks the action Failed — the rollout then lands in
//! Failed, never RolledBack, signalling that a human has to finish the
//! job. The executor never performs promotion-direction mutations.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use stagegate_state::{RollbackAction, RollbackOutcome, StateStore};

use crate::backend::{TrafficBackend, TrafficSplit};
use crate::error::{ControllerError, ControllerResult};

/// Retry tuning for remediation.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Total backend attempts before giving up.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles per attempt.
    pub base_backoff: Duration,
    /// Backoff cap.
    pub max_backoff: Duration,
    /// Timeout per backend call. Elapse counts as a transient failure
    /// so the bounded retry machinery applies.
    pub call_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Executes rollback remediation for the controller.
pub struct RollbackExecutor {
    backend: Arc<dyn TrafficBackend>,
    store: StateStore,
    config: ExecutorConfig,
}

impl RollbackExecutor {
    pub fn new(backend: Arc<dyn TrafficBackend>, store: StateStore, config: ExecutorConfig) -> Self {
        Self {
            backend,
            store,
            config,
        }
    }

    /// Run remediation for a rollout. Returns the finished action.
    ///
    /// The caller holds the rollout's transition lock, and a pending
    /// action recorded in the store rejects re-entry, so at most one
    /// action is ever in flight per rollout.
    pub async fn execute(&self, rollout_id: &str, reason: &str) -> ControllerResult<RollbackAction> {
        if let Some(existing) = self.store.get_rollback_action(rollout_id)?
            && existing.in_flight()
        {
            return Err(ControllerError::RollbackInFlight(rollout_id.to_string()));
        }

        let mut action = RollbackAction {
            rollout_id: rollout_id.to_string(),
            reason: reason.to_string(),
            attempts: 0,
            outcome: RollbackOutcome::Pending,
            started_at: epoch_secs(),
            finished_at: None,
        };
        self.store.put_rollback_action(&action)?;
        info!(rollout = %rollout_id, %reason, "rollback remediation starting");

        let mut backoff = self.config.base_backoff;
        loop {
            action.attempts += 1;
            match self.attempt(rollout_id).await {
                Ok(mutated) => {
                    action.outcome = RollbackOutcome::Success;
                    action.finished_at = Some(epoch_secs());
                    self.store.put_rollback_action(&action)?;
                    info!(
                        rollout = %rollout_id,
                        attempts = action.attempts,
                        mutated,
                        "rollback remediation succeeded"
                    );
                    return Ok(action);
                }
                Err(e) if e.is_transient() && action.attempts < self.config.max_attempts => {
                    warn!(
                        rollout = %rollout_id,
                        attempt = action.attempts,
                        error = %e,
                        "rollback attempt failed, retrying"
                    );
                    action.outcome = RollbackOutcome::Retrying;
                    self.store.put_rollback_action(&action)?;
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.config.max_backoff);
                }
                Err(e) => {
                    action.outcome = RollbackOutcome::Failed;
                    action.finished_at = Some(epoch_secs());
                    self.store.put_rollback_action(&action)?;
                    warn!(
                        rollout = %rollout_id,
                        attempts = action.attempts,
                        error = %e,
                        "rollback remediation exhausted"
                    );
                    return Err(ControllerError::RollbackExhausted {
                        id: rollout_id.to_string(),
                        attempts: action.attempts,
                    });
                }
            }
        }
    }

    /// One remediation attempt. Returns whether a mutation was issued.
    async fn attempt(&self, rollout_id: &str) -> Result<bool, crate::backend::BackendError> {
        let split = self
            .call(self.backend.get_traffic_split(rollout_id))
            .await?;
        if split.candidate_weight == 0 {
            // Already fully on the baseline: idempotent no-op.
            return Ok(false);
        }
        self.call(
            self.backend
                .set_traffic_split(rollout_id, TrafficSplit::all_baseline()),
        )
        .await?;
        Ok(true)
    }

    /// Await a backend call under the configured timeout. A call that
    /// neither succeeds nor fails in time is a transient failure.
    async fn call<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, crate::backend::BackendError>>,
    ) -> Result<T, crate::backend::BackendError> {
        match tokio::time::timeout(self.config.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(crate::backend::BackendError::Transient(format!(
                "backend call timed out after {:?}",
                self.config.call_timeout
            ))),
        }
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, MemoryBackend};
    use stagegate_signals::BoxFuture;

    fn test_config() -> ExecutorConfig {
        ExecutorConfig {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            call_timeout: Duration::from_millis(20),
        }
    }

    fn executor(backend: Arc<MemoryBackend>, store: &StateStore) -> RollbackExecutor {
        RollbackExecutor::new(backend, store.clone(), test_config())
    }

    /// Backend whose calls never complete.
    struct StalledBackend;

    impl TrafficBackend for StalledBackend {
        fn get_traffic_split(
            &self,
            _rollout_id: &str,
        ) -> BoxFuture<'_, Result<TrafficSplit, BackendError>> {
            Box::pin(std::future::pending())
        }

        fn set_traffic_split(
            &self,
            _rollout_id: &str,
            _split: TrafficSplit,
        ) -> BoxFuture<'_, Result<(), BackendError>> {
            Box::pin(std::future::pending())
        }
    }

    #[tokio::test]
    async fn rolls_candidate_traffic_back_to_baseline() {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed("ro-1", TrafficSplit::candidate_at(40));
        let store = StateStore::open_in_memory().unwrap();

        let action = executor(backend.clone(), &store)
            .execute("ro-1", "fast_fail:error_rate")
            .await
            .unwrap();

        assert_eq!(action.outcome, RollbackOutcome::Success);
        assert_eq!(action.attempts, 1);
        assert_eq!(backend.split("ro-1").unwrap(), TrafficSplit::all_baseline());
        assert_eq!(backend.set_calls(), 1);
    }

    #[tokio::test]
    async fn second_invocation_is_idempotent() {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed("ro-1", TrafficSplit::candidate_at(40));
        let store = StateStore::open_in_memory().unwrap();
        let exec = executor(backend.clone(), &store);

        exec.execute("ro-1", "first").await.unwrap();
        assert_eq!(backend.set_calls(), 1);

        // No intervening traffic change: Success without a second mutation.
        let action = exec.execute("ro-1", "second").await.unwrap();
        assert_eq!(action.outcome, RollbackOutcome::Success);
        assert_eq!(backend.set_calls(), 1);
    }

    #[tokio::test]
    async fn transient_failures_retry_then_succeed() {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed("ro-1", TrafficSplit::candidate_at(40));
        backend.fail_next_sets(2);
        let store = StateStore::open_in_memory().unwrap();

        let action = executor(backend.clone(), &store)
            .execute("ro-1", "safety_timeout")
            .await
            .unwrap();

        assert_eq!(action.outcome, RollbackOutcome::Success);
        assert_eq!(action.attempts, 3);
        assert_eq!(backend.split("ro-1").unwrap(), TrafficSplit::all_baseline());
    }

    #[tokio::test]
    async fn exhausted_retries_mark_action_failed() {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed("ro-1", TrafficSplit::candidate_at(40));
        backend.fail_next_sets(10); // all three attempts fail
        let store = StateStore::open_in_memory().unwrap();

        let err = executor(backend.clone(), &store)
            .execute("ro-1", "fast_fail:error_rate")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControllerError::RollbackExhausted { attempts: 3, .. }
        ));

        let action = store.get_rollback_action("ro-1").unwrap().unwrap();
        assert_eq!(action.outcome, RollbackOutcome::Failed);
        assert!(action.finished_at.is_some());
        // Candidate traffic was never moved.
        assert_eq!(backend.split("ro-1").unwrap().candidate_weight, 40);
    }

    #[tokio::test]
    async fn unresponsive_backend_times_out_and_exhausts() {
        let store = StateStore::open_in_memory().unwrap();
        let exec = RollbackExecutor::new(Arc::new(StalledBackend), store.clone(), test_config());

        // Calls that hang are cut off by the per-call timeout; each
        // elapse counts as a transient failure, so remediation reaches
        // exhaustion instead of stalling forever.
        let settled = tokio::time::timeout(
            Duration::from_secs(2),
            exec.execute("ro-1", "fast_fail:error_rate"),
        )
        .await
        .expect("remediation must settle within the retry bound");

        assert!(matches!(
            settled.unwrap_err(),
            ControllerError::RollbackExhausted { attempts: 3, .. }
        ));
        let action = store.get_rollback_action("ro-1").unwrap().unwrap();
        assert_eq!(action.outcome, RollbackOutcome::Failed);
    }

    #[tokio::test]
    async fn in_flight_action_rejects_reentry() {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed("ro-1", TrafficSplit::candidate_at(40));
        let store = StateStore::open_in_memory().unwrap();

        store
            .put_rollback_action(&RollbackAction {
                rollout_id: "ro-1".to_string(),
                reason: "earlier trigger".to_string(),
                attempts: 1,
                outcome: RollbackOutcome::Retrying,
                started_at: 0,
                finished_at: None,
            })
            .unwrap();

        let err = executor(backend, &store)
            .execute("ro-1", "again")
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::RollbackInFlight(_)));
    }

    #[tokio::test]
    async fn permanent_failure_does_not_retry() {
        let backend = Arc::new(MemoryBackend::new());
        // Not seeded: get_traffic_split is a permanent failure.
        let store = StateStore::open_in_memory().unwrap();

        let err = executor(backend, &store)
            .execute("ro-1", "trigger")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControllerError::RollbackExhausted { attempts: 1, .. }
        ));
    }
}
