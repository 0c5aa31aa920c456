//! Coordinator — rollout registry and per-rollout control loops.
//!
//! The coordinator owns the only registry of active rollouts (keyed by
//! rollout id, no ambient globals) and spawns one ticker-driven loop per
//! rollout. A loop exclusively owns its rollout's mutation for its whole
//! life: operator commands arrive over a channel and are drained at the
//! top of each polling cycle, so pause/resume/abort are observed within
//! one interval and never preempt a cycle in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use stagegate_evaluator::{EvaluatorConfig, StageEvaluator};
use stagegate_gate::{DeploymentManifest, PreDeployGate, TargetEnvironment};
use stagegate_signals::{AggregatorConfig, SignalAggregator, TelemetrySource, TimeRange};
use stagegate_state::{
    Decision, Rollout, RolloutId, RolloutStatus, StageSpec, StateStore, TransitionEvent, Verdict,
};

use crate::backend::{AuditEvent, AuditSink, BackendError, TrafficBackend, TrafficSplit};
use crate::error::{ControllerError, ControllerResult};
use crate::executor::{ExecutorConfig, RollbackExecutor};
use crate::machine;

/// Control-plane tuning shared by all rollouts.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Polling cadence of each rollout's control loop.
    pub poll_interval: Duration,
    pub aggregator: AggregatorConfig,
    pub evaluator: EvaluatorConfig,
    pub executor: ExecutorConfig,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            aggregator: AggregatorConfig::default(),
            evaluator: EvaluatorConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

/// Operator commands, consumed at the top of each control cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    Pause,
    Resume,
    Abort,
}

/// Everything needed to create a rollout.
#[derive(Debug, Clone)]
pub struct RolloutRequest {
    pub id: RolloutId,
    pub service: String,
    pub baseline_version: String,
    pub candidate_version: String,
    pub stages: Vec<StageSpec>,
    pub manifest: DeploymentManifest,
    pub environment: TargetEnvironment,
}

/// Per-rollout loop handle held in the registry.
struct RolloutSlot {
    command_tx: mpsc::UnboundedSender<OperatorCommand>,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// The rollout control plane.
pub struct Coordinator {
    store: StateStore,
    telemetry: Arc<dyn TelemetrySource>,
    backend: Arc<dyn TrafficBackend>,
    audit: Arc<dyn AuditSink>,
    gate: PreDeployGate,
    config: ControlConfig,
    /// Active rollouts: rollout id → slot.
    slots: Arc<RwLock<HashMap<RolloutId, RolloutSlot>>>,
}

impl Coordinator {
    pub fn new(
        store: StateStore,
        telemetry: Arc<dyn TelemetrySource>,
        backend: Arc<dyn TrafficBackend>,
        audit: Arc<dyn AuditSink>,
        gate: PreDeployGate,
        config: ControlConfig,
    ) -> Self {
        Self {
            store,
            telemetry,
            backend,
            audit,
            gate,
            config,
            slots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Gate and create a rollout, then start its control loop.
    ///
    /// Fails closed: on any gate violation no rollout object is created
    /// and no traffic changes; the complete violation set is returned to
    /// the caller and an operator alert is raised.
    pub async fn create_rollout(&self, request: RolloutRequest) -> ControllerResult<()> {
        machine::validate_stages(&request.id, &request.stages)?;
        {
            let slots = self.slots.read().await;
            if slots.contains_key(&request.id) {
                return Err(ControllerError::AlreadyRegistered(request.id));
            }
        }

        let now = epoch_secs();
        let gate_result = self
            .gate
            .evaluate(&request.manifest, &request.environment, now);
        if !gate_result.passed() {
            self.audit.record(AuditEvent::Alert {
                rollout_id: request.id.clone(),
                message: format!(
                    "pre-deploy gate blocked rollout: {}",
                    gate_result
                        .violations
                        .iter()
                        .map(|v| v.rule.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            });
            return Err(ControllerError::GateRejected(gate_result));
        }

        let mut rollout = Rollout {
            id: request.id.clone(),
            service: request.service,
            baseline_version: request.baseline_version,
            candidate_version: request.candidate_version,
            stages: request.stages,
            current_stage: 0,
            status: RolloutStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.store.create_rollout(&rollout)?;

        // Zero traffic has shifted yet; the loop ramps stage 0.
        let event =
            machine::transition(&mut rollout, RolloutStatus::Validating, now, "gate invoked")?;
        self.persist_transition(&rollout, event)?;
        let event = machine::transition(
            &mut rollout,
            RolloutStatus::Progressing,
            now,
            "gate passed, entering stage 0",
        )?;
        self.persist_transition(&rollout, event)?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let ctx = LoopContext {
            rollout_id: rollout.id.clone(),
            store: self.store.clone(),
            aggregator: SignalAggregator::new(
                Arc::clone(&self.telemetry),
                self.config.aggregator.clone(),
            ),
            backend: Arc::clone(&self.backend),
            executor: RollbackExecutor::new(
                Arc::clone(&self.backend),
                self.store.clone(),
                self.config.executor.clone(),
            ),
            audit: Arc::clone(&self.audit),
            evaluator_config: self.config.evaluator.clone(),
            executor_config: self.config.executor.clone(),
            poll_interval: self.config.poll_interval,
        };
        let handle = tokio::spawn(run_control_loop(ctx, command_rx, shutdown_rx));

        let mut slots = self.slots.write().await;
        slots.insert(
            rollout.id.clone(),
            RolloutSlot {
                command_tx,
                shutdown_tx,
                handle,
            },
        );
        info!(rollout = %rollout.id, "rollout created, control loop started");
        Ok(())
    }

    /// Suspend evaluation and traffic changes. Observed at the next
    /// poll boundary.
    pub async fn pause(&self, rollout_id: &str) -> ControllerResult<()> {
        self.send(rollout_id, OperatorCommand::Pause).await
    }

    /// Resume a paused rollout at the same stage.
    pub async fn resume(&self, rollout_id: &str) -> ControllerResult<()> {
        self.send(rollout_id, OperatorCommand::Resume).await
    }

    /// Force the rollback path.
    pub async fn abort(&self, rollout_id: &str) -> ControllerResult<()> {
        self.send(rollout_id, OperatorCommand::Abort).await
    }

    /// Current persisted state of a rollout.
    pub fn status(&self, rollout_id: &str) -> ControllerResult<Rollout> {
        self.store
            .get_rollout(rollout_id)?
            .ok_or_else(|| ControllerError::NotFound(rollout_id.to_string()))
    }

    /// Ids of rollouts with a live control loop.
    pub async fn active_rollouts(&self) -> Vec<RolloutId> {
        let slots = self.slots.read().await;
        slots.keys().cloned().collect()
    }

    /// Stop all control loops (for graceful shutdown). Rollout state
    /// stays persisted wherever it was.
    pub async fn shutdown(&self) {
        let mut slots = self.slots.write().await;
        for (id, slot) in slots.drain() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            debug!(rollout = %id, "control loop stopped");
        }
        info!("all control loops stopped");
    }

    async fn send(&self, rollout_id: &str, command: OperatorCommand) -> ControllerResult<()> {
        let slots = self.slots.read().await;
        let slot = slots
            .get(rollout_id)
            .ok_or_else(|| ControllerError::NotFound(rollout_id.to_string()))?;
        slot.command_tx
            .send(command)
            .map_err(|_| ControllerError::NotFound(rollout_id.to_string()))?;
        debug!(rollout = %rollout_id, ?command, "operator command queued");
        Ok(())
    }

    fn persist_transition(
        &self,
        rollout: &Rollout,
        event: TransitionEvent,
    ) -> ControllerResult<()> {
        self.store.update_rollout(rollout)?;
        self.store.append_transition(&event)?;
        self.audit.record(AuditEvent::Transition(event));
        Ok(())
    }
}

/// Everything one control loop owns.
struct LoopContext {
    rollout_id: RolloutId,
    store: StateStore,
    aggregator: SignalAggregator,
    backend: Arc<dyn TrafficBackend>,
    executor: RollbackExecutor,
    audit: Arc<dyn AuditSink>,
    evaluator_config: EvaluatorConfig,
    executor_config: ExecutorConfig,
    poll_interval: Duration,
}

/// Per-stage loop state, reset on every stage entry.
struct StageClock {
    entered: Instant,
    paused_for: Duration,
    pause_started: Option<Instant>,
    traffic_set: bool,
}

impl StageClock {
    fn start() -> Self {
        Self {
            entered: Instant::now(),
            paused_for: Duration::ZERO,
            pause_started: None,
            traffic_set: false,
        }
    }

    /// Stage time excluding pauses, so a long pause cannot burn the
    /// safety timeout on its own.
    fn elapsed(&self) -> Duration {
        let paused = self.paused_for
            + self
                .pause_started
                .map(|p| p.elapsed())
                .unwrap_or(Duration::ZERO);
        self.entered.elapsed().saturating_sub(paused)
    }

    fn pause(&mut self) {
        self.pause_started = Some(Instant::now());
    }

    fn resume(&mut self) {
        if let Some(started) = self.pause_started.take() {
            self.paused_for += started.elapsed();
        }
    }
}

/// The control loop for a single rollout.
async fn run_control_loop(
    ctx: LoopContext,
    mut commands: mpsc::UnboundedReceiver<OperatorCommand>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut rollout = match ctx.store.get_rollout(&ctx.rollout_id) {
        Ok(Some(r)) => r,
        Ok(None) => {
            warn!(rollout = %ctx.rollout_id, "control loop found no rollout, exiting");
            return;
        }
        Err(e) => {
            warn!(rollout = %ctx.rollout_id, error = %e, "control loop failed to load rollout");
            return;
        }
    };

    let mut evaluator = match rollout.active_stage() {
        Some(stage) => StageEvaluator::new(stage.clone(), ctx.evaluator_config.clone()),
        None => return,
    };
    let mut clock = StageClock::start();
    let mut window_id = 0u64;

    debug!(rollout = %rollout.id, "control loop starting");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(ctx.poll_interval) => {}
            _ = shutdown.changed() => {
                debug!(rollout = %rollout.id, "control loop shutting down");
                return;
            }
        }

        // Operator commands are observed here, at the cycle boundary.
        while let Ok(command) = commands.try_recv() {
            apply_command(&ctx, &mut rollout, &mut clock, command).await;
        }

        if rollout.status.is_terminal() {
            break;
        }
        if rollout.status == RolloutStatus::Paused {
            continue;
        }

        let Some(stage) = rollout.active_stage().cloned() else {
            warn!(rollout = %rollout.id, stage = rollout.current_stage, "stage index out of range");
            break;
        };

        // Ramp traffic to the stage target on stage entry.
        if !clock.traffic_set {
            match shift_traffic(&ctx, &rollout.id, stage.traffic_weight).await {
                Ok(()) => clock.traffic_set = true,
                Err(e) => {
                    // Cannot reach the backend in the promote direction:
                    // fail toward safety.
                    warn!(rollout = %rollout.id, error = %e, "traffic ramp failed, rolling back");
                    remediate(&ctx, &mut rollout, "traffic ramp failed past retry bound").await;
                    continue;
                }
            }
        }

        // Safety timeout fires regardless of evaluator state.
        let stage_elapsed = clock.elapsed();
        if stage_elapsed > Duration::from_secs(stage.max_duration_secs) {
            let reason = format!(
                "safety_timeout: stage {} exceeded {}s",
                rollout.current_stage, stage.max_duration_secs
            );
            remediate(&ctx, &mut rollout, &reason).await;
            continue;
        }

        let now = epoch_secs();
        let range = TimeRange {
            start: now.saturating_sub(ctx.poll_interval.as_secs().max(1)),
            end: now + 1,
        };
        let metrics = evaluator.metric_names();
        let snapshot = ctx.aggregator.collect(&metrics, window_id, range).await;
        window_id += 1;

        let min_elapsed = stage_elapsed >= Duration::from_secs(stage.min_duration_secs);
        let evaluation = evaluator.observe(&snapshot, min_elapsed);

        let verdict = Verdict {
            rollout_id: rollout.id.clone(),
            stage: rollout.current_stage,
            timestamp: now,
            decision: evaluation.decision,
            findings: evaluation.findings,
            confidence: evaluation.confidence,
            reason: evaluation.reason.clone(),
        };
        if let Err(e) = ctx.store.append_verdict(&verdict) {
            warn!(rollout = %rollout.id, error = %e, "failed to append verdict");
        }
        ctx.audit.record(AuditEvent::Verdict(verdict));

        match evaluation.decision {
            Decision::Hold => {}
            Decision::Promote if rollout.on_last_stage() => {
                apply_transition(&ctx, &mut rollout, RolloutStatus::Promoted, &evaluation.reason);
                break;
            }
            Decision::Promote => {
                let now = epoch_secs();
                if let Err(e) = machine::advance_stage(&mut rollout, now) {
                    warn!(rollout = %rollout.id, error = %e, "stage advance rejected");
                    continue;
                }
                // Stage advances keep the Progressing status; record
                // them on the audit trail all the same.
                let event = TransitionEvent {
                    rollout_id: rollout.id.clone(),
                    from: RolloutStatus::Progressing,
                    to: RolloutStatus::Progressing,
                    timestamp: now,
                    reason: format!(
                        "advanced to stage {} (weight {})",
                        rollout.current_stage,
                        rollout.active_stage().map(|s| s.traffic_weight).unwrap_or(0)
                    ),
                };
                persist_event(&ctx, &rollout, event);

                if let Some(next) = rollout.active_stage() {
                    evaluator = StageEvaluator::new(next.clone(), ctx.evaluator_config.clone());
                }
                clock = StageClock::start();
            }
            Decision::Rollback => {
                remediate(&ctx, &mut rollout, &evaluation.reason).await;
            }
        }

        if rollout.status.is_terminal() {
            break;
        }
    }

    info!(rollout = %rollout.id, status = %rollout.status, "control loop finished");
}

/// Handle one operator command at a cycle boundary.
async fn apply_command(
    ctx: &LoopContext,
    rollout: &mut Rollout,
    clock: &mut StageClock,
    command: OperatorCommand,
) {
    match command {
        OperatorCommand::Pause if rollout.status == RolloutStatus::Progressing => {
            apply_transition(ctx, rollout, RolloutStatus::Paused, "operator pause");
            clock.pause();
        }
        OperatorCommand::Resume if rollout.status == RolloutStatus::Paused => {
            apply_transition(ctx, rollout, RolloutStatus::Progressing, "operator resume");
            clock.resume();
        }
        OperatorCommand::Abort
            if matches!(
                rollout.status,
                RolloutStatus::Progressing | RolloutStatus::Paused
            ) =>
        {
            remediate(ctx, rollout, "operator abort").await;
        }
        _ => {
            warn!(
                rollout = %rollout.id,
                status = %rollout.status,
                ?command,
                "operator command not applicable, ignored"
            );
        }
    }
}

/// Run rollback remediation and settle the rollout's terminal status.
async fn remediate(ctx: &LoopContext, rollout: &mut Rollout, reason: &str) {
    match ctx.executor.execute(&rollout.id, reason).await {
        Ok(_) => {
            apply_transition(ctx, rollout, RolloutStatus::RolledBack, reason);
        }
        Err(ControllerError::RollbackExhausted { attempts, .. }) => {
            let message = format!(
                "rollback exhausted after {attempts} attempts ({reason}); manual intervention required"
            );
            apply_transition(ctx, rollout, RolloutStatus::Failed, &message);
            ctx.audit.record(AuditEvent::Alert {
                rollout_id: rollout.id.clone(),
                message,
            });
        }
        Err(e) => {
            let message = format!("rollback could not run: {e} ({reason})");
            apply_transition(ctx, rollout, RolloutStatus::Failed, &message);
            ctx.audit.record(AuditEvent::Alert {
                rollout_id: rollout.id.clone(),
                message,
            });
        }
    }
}

/// Apply, persist, and audit one status transition.
fn apply_transition(ctx: &LoopContext, rollout: &mut Rollout, to: RolloutStatus, reason: &str) {
    match machine::transition(rollout, to, epoch_secs(), reason) {
        Ok(event) => persist_event(ctx, rollout, event),
        Err(e) => warn!(rollout = %rollout.id, error = %e, "transition rejected"),
    }
}

fn persist_event(ctx: &LoopContext, rollout: &Rollout, event: TransitionEvent) {
    if let Err(e) = ctx.store.update_rollout(rollout) {
        warn!(rollout = %rollout.id, error = %e, "failed to persist rollout");
    }
    if let Err(e) = ctx.store.append_transition(&event) {
        warn!(rollout = %rollout.id, error = %e, "failed to append transition");
    }
    ctx.audit.record(AuditEvent::Transition(event));
}

/// Promotion-direction traffic shift with the same bounded retry policy
/// as remediation.
async fn shift_traffic(ctx: &LoopContext, rollout_id: &str, weight: u32) -> ControllerResult<()> {
    let mut backoff = ctx.executor_config.base_backoff;
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let call = ctx
            .backend
            .set_traffic_split(rollout_id, TrafficSplit::candidate_at(weight));
        // Same per-call timeout as remediation: a hanging backend must
        // not stall the control loop.
        let result = match tokio::time::timeout(ctx.executor_config.call_timeout, call).await {
            Ok(r) => r,
            Err(_) => Err(BackendError::Transient(format!(
                "traffic ramp timed out after {:?}",
                ctx.executor_config.call_timeout
            ))),
        };
        match result {
            Ok(()) => {
                info!(rollout = %rollout_id, weight, "traffic ramped");
                return Ok(());
            }
            Err(e) if e.is_transient() && attempts < ctx.executor_config.max_attempts => {
                debug!(rollout = %rollout_id, attempt = attempts, error = %e, "traffic ramp retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(ctx.executor_config.max_backoff);
            }
            Err(e) => return Err(ControllerError::Backend(e)),
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
    use crate::backend::{MemoryBackend, MemorySink};
    use stagegate_signals::{BoxFuture, TelemetryError};
    use stagegate_state::{
        Cohort, CompareMode, Comparator, MetricThreshold, SignalSample, Statistic,
    };
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex;

    /// Telemetry source that returns a fixed per-metric value for every
    /// query, with enough samples to clear the minimum.
    struct ScriptedSource {
        values: Mutex<StdHashMap<String, f64>>,
    }

    impl ScriptedSource {
        fn new(values: &[(&str, f64)]) -> Self {
            Self {
                values: Mutex::new(
                    values
                        .iter()
                        .map(|(k, v)| (k.to_string(), *v))
                        .collect(),
                ),
            }
        }

        fn set(&self, metric: &str, value: f64) {
            self.values
                .lock()
                .unwrap()
                .insert(metric.to_string(), value);
        }
    }

    impl TelemetrySource for ScriptedSource {
        fn query(
            &self,
            metric: &str,
            cohort: Cohort,
            range: TimeRange,
        ) -> BoxFuture<'_, Result<Vec<SignalSample>, TelemetryError>> {
            let metric = metric.to_string();
            Box::pin(async move {
                let value = match self.values.lock().unwrap().get(&metric) {
                    Some(v) => *v,
                    None => return Ok(Vec::new()),
                };
                // Baseline cohorts report a steady value below threshold.
                let value = if cohort == Cohort::Baseline { value.min(0.1) } else { value };
                Ok((0..10)
                    .map(|i| SignalSample {
                        metric: metric.clone(),
                        timestamp: range.start,
                        value,
                        cohort,
                        window_id: i,
                    })
                    .collect())
            })
        }
    }

    fn threshold(metric: &str, limit: f64, tolerance: f64) -> MetricThreshold {
        MetricThreshold {
            metric: metric.to_string(),
            statistic: Statistic::Mean,
            comparator: Comparator::Below,
            threshold: limit,
            tolerance,
            mode: CompareMode::Absolute,
        }
    }

    fn stage(weight: u32, k: u32, max_secs: u64) -> StageSpec {
        StageSpec {
            traffic_weight: weight,
            min_duration_secs: 0,
            max_duration_secs: max_secs,
            required_healthy_windows: k,
            thresholds: vec![threshold("error_rate", 1.0, 0.5)],
        }
    }

    fn test_config() -> ControlConfig {
        ControlConfig {
            poll_interval: Duration::from_millis(5),
            aggregator: AggregatorConfig {
                min_samples: 5,
                query_timeout: Duration::from_millis(100),
                max_retries: 1,
                retry_backoff: Duration::from_millis(1),
            },
            evaluator: EvaluatorConfig::default(),
            executor: ExecutorConfig {
                max_attempts: 3,
                base_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(4),
                call_timeout: Duration::from_millis(20),
            },
        }
    }

    fn request(id: &str, stages: Vec<StageSpec>) -> RolloutRequest {
        RolloutRequest {
            id: id.to_string(),
            service: "api".to_string(),
            baseline_version: "v1.9.0".to_string(),
            candidate_version: "v2.0.0".to_string(),
            stages,
            manifest: manifest(),
            environment: environment(),
        }
    }

    fn manifest() -> DeploymentManifest {
        DeploymentManifest {
            service: "api".to_string(),
            candidate_version: "v2.0.0".to_string(),
            baseline_version: "v1.9.0".to_string(),
            resources: Some(stagegate_gate::ResourceLimits {
                cpu_millis: 500,
                memory_bytes: 256 * 1024 * 1024,
            }),
            labels: StdHashMap::new(),
            approvals: Vec::new(),
        }
    }

    fn environment() -> TargetEnvironment {
        TargetEnvironment {
            name: "staging".to_string(),
            required_labels: Vec::new(),
            required_approvals: 0,
            freeze_windows: Vec::new(),
        }
    }

    struct Harness {
        coordinator: Coordinator,
        store: StateStore,
        backend: Arc<MemoryBackend>,
        sink: Arc<MemorySink>,
        #[allow(dead_code)]
        source: Arc<ScriptedSource>,
    }

    fn harness(source: ScriptedSource) -> Harness {
        let store = StateStore::open_in_memory().unwrap();
        let backend = Arc::new(MemoryBackend::new());
        let sink = Arc::new(MemorySink::new());
        let source = Arc::new(source);
        let coordinator = Coordinator::new(
            store.clone(),
            source.clone(),
            backend.clone(),
            sink.clone(),
            PreDeployGate::default(),
            test_config(),
        );
        Harness {
            coordinator,
            store,
            backend,
            sink,
            source,
        }
    }

    async fn wait_for_status(store: &StateStore, id: &str, status: RolloutStatus) -> Rollout {
        for _ in 0..400 {
            let rollout = store.get_rollout(id).unwrap().unwrap();
            if rollout.status == status {
                return rollout;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("rollout {id} never reached {status}");
    }

    #[tokio::test]
    async fn healthy_rollout_promotes_through_all_stages() {
        let h = harness(ScriptedSource::new(&[("error_rate", 0.4)]));
        h.backend.seed("ro-1", TrafficSplit::all_baseline());

        h.coordinator
            .create_rollout(request("ro-1", vec![stage(10, 2, 600), stage(100, 2, 600)]))
            .await
            .unwrap();

        let rollout = wait_for_status(&h.store, "ro-1", RolloutStatus::Promoted).await;
        assert_eq!(rollout.current_stage, 1);
        // Final stage ramped the candidate to full traffic.
        assert_eq!(h.backend.split("ro-1").unwrap().candidate_weight, 100);

        // Verdict history ends in a Promote; the trail ends Promoted.
        let verdicts = h.store.list_verdicts("ro-1").unwrap();
        assert_eq!(verdicts.last().unwrap().decision, Decision::Promote);
        let trail = h.store.list_transitions("ro-1").unwrap();
        assert_eq!(trail.last().unwrap().to, RolloutStatus::Promoted);
        // Stage index on verdicts is non-decreasing while progressing.
        let stages: Vec<usize> = verdicts.iter().map(|v| v.stage).collect();
        assert!(stages.windows(2).all(|w| w[0] <= w[1]));
        h.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn fast_fail_rolls_back_and_restores_baseline() {
        let h = harness(ScriptedSource::new(&[("error_rate", 5.0)]));
        h.backend.seed("ro-1", TrafficSplit::all_baseline());

        h.coordinator
            .create_rollout(request("ro-1", vec![stage(10, 2, 600)]))
            .await
            .unwrap();

        wait_for_status(&h.store, "ro-1", RolloutStatus::RolledBack).await;
        assert_eq!(h.backend.split("ro-1").unwrap(), TrafficSplit::all_baseline());

        let verdicts = h.store.list_verdicts("ro-1").unwrap();
        assert!(verdicts.iter().any(|v| v.decision == Decision::Rollback));
        // Rollback never ends in Promoted.
        let trail = h.store.list_transitions("ro-1").unwrap();
        assert!(trail.iter().all(|t| t.to != RolloutStatus::Promoted));
        h.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn backend_exhaustion_fails_with_alert() {
        let h = harness(ScriptedSource::new(&[("error_rate", 0.4)]));
        // Candidate already has traffic and every set call fails: the
        // initial ramp fails, remediation retries, then exhausts.
        h.backend.seed("ro-1", TrafficSplit::candidate_at(10));
        h.backend.fail_next_sets(100);

        h.coordinator
            .create_rollout(request("ro-1", vec![stage(10, 2, 600)]))
            .await
            .unwrap();

        wait_for_status(&h.store, "ro-1", RolloutStatus::Failed).await;
        let action = h.store.get_rollback_action("ro-1").unwrap().unwrap();
        assert_eq!(action.outcome, stagegate_state::RollbackOutcome::Failed);
        assert!(!h.sink.alerts().is_empty());
        h.coordinator.shutdown().await;
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
    async fn stalled_backend_fails_safe_instead_of_hanging() {
        // Every backend call hangs: the traffic ramp times out past the
        // retry bound, remediation times out too, and the rollout lands
        // in Failed with an alert rather than wedging its loop.
        let store = StateStore::open_in_memory().unwrap();
        let sink = Arc::new(MemorySink::new());
        let coordinator = Coordinator::new(
            store.clone(),
            Arc::new(ScriptedSource::new(&[("error_rate", 0.4)])),
            Arc::new(StalledBackend),
            sink.clone(),
            PreDeployGate::default(),
            test_config(),
        );

        coordinator
            .create_rollout(request("ro-1", vec![stage(10, 2, 600)]))
            .await
            .unwrap();

        wait_for_status(&store, "ro-1", RolloutStatus::Failed).await;
        assert!(!sink.alerts().is_empty());
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn gate_violation_creates_nothing() {
        let h = harness(ScriptedSource::new(&[("error_rate", 0.4)]));

        let mut req = request("ro-1", vec![stage(10, 2, 600)]);
        req.environment.freeze_windows.push(stagegate_gate::FreezeWindow {
            start: 0,
            end: u64::MAX,
            reason: "change freeze".to_string(),
        });

        let err = h.coordinator.create_rollout(req).await.unwrap_err();
        let ControllerError::GateRejected(result) = err else {
            panic!("expected gate rejection");
        };
        assert_eq!(result.violations[0].rule, "freeze_window_active");

        // Fails closed: no rollout object, no loop, no traffic change.
        assert!(h.store.get_rollout("ro-1").unwrap().is_none());
        assert!(h.coordinator.active_rollouts().await.is_empty());
        assert!(h.backend.split("ro-1").is_none());
        assert!(!h.sink.alerts().is_empty());
    }

    #[tokio::test]
    async fn no_telemetry_holds_without_verdict_movement() {
        // No values scripted: every query returns zero samples.
        let h = harness(ScriptedSource::new(&[]));
        h.backend.seed("ro-1", TrafficSplit::all_baseline());

        h.coordinator
            .create_rollout(request("ro-1", vec![stage(10, 2, 600)]))
            .await
            .unwrap();

        // Give the loop several cycles to accumulate verdicts.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let rollout = h.store.get_rollout("ro-1").unwrap().unwrap();
        assert_eq!(rollout.status, RolloutStatus::Progressing);
        let verdicts = h.store.list_verdicts("ro-1").unwrap();
        assert!(!verdicts.is_empty());
        for v in &verdicts {
            assert_eq!(v.decision, Decision::Hold);
            assert!(v.reason.starts_with("insufficient data"));
        }
        h.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn pause_resume_abort_are_observed_at_cycle_boundaries() {
        // Healthy but K is high, so the rollout holds indefinitely.
        let h = harness(ScriptedSource::new(&[("error_rate", 0.4)]));
        h.backend.seed("ro-1", TrafficSplit::all_baseline());

        h.coordinator
            .create_rollout(request("ro-1", vec![stage(10, 1000, 600)]))
            .await
            .unwrap();

        h.coordinator.pause("ro-1").await.unwrap();
        wait_for_status(&h.store, "ro-1", RolloutStatus::Paused).await;

        // Paused suspends evaluation and traffic changes: across many
        // poll intervals no verdict is recorded and the split is frozen.
        let frozen_verdicts = h.store.verdict_count("ro-1").unwrap();
        let frozen_split = h.backend.split("ro-1").unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(h.store.verdict_count("ro-1").unwrap(), frozen_verdicts);
        assert_eq!(h.backend.split("ro-1").unwrap(), frozen_split);

        h.coordinator.resume("ro-1").await.unwrap();
        let rollout = wait_for_status(&h.store, "ro-1", RolloutStatus::Progressing).await;
        assert_eq!(rollout.current_stage, 0);

        // Evaluation resumes at the same stage.
        for _ in 0..400 {
            if h.store.verdict_count("ro-1").unwrap() > frozen_verdicts {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(h.store.verdict_count("ro-1").unwrap() > frozen_verdicts);

        h.coordinator.abort("ro-1").await.unwrap();
        wait_for_status(&h.store, "ro-1", RolloutStatus::RolledBack).await;
        h.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn safety_timeout_forces_rollback() {
        // Healthy but K unreachable, and the stage max duration is tiny.
        let h = harness(ScriptedSource::new(&[("error_rate", 0.4)]));
        h.backend.seed("ro-1", TrafficSplit::all_baseline());

        h.coordinator
            .create_rollout(request("ro-1", vec![stage(10, 1000, 0)]))
            .await
            .unwrap();

        wait_for_status(&h.store, "ro-1", RolloutStatus::RolledBack).await;
        let trail = h.store.list_transitions("ro-1").unwrap();
        assert!(
            trail
                .iter()
                .any(|t| t.to == RolloutStatus::RolledBack
                    && t.reason.starts_with("safety_timeout"))
        );
        h.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_rollout_id_rejected() {
        let h = harness(ScriptedSource::new(&[("error_rate", 0.4)]));
        h.backend.seed("ro-1", TrafficSplit::all_baseline());

        h.coordinator
            .create_rollout(request("ro-1", vec![stage(10, 1000, 600)]))
            .await
            .unwrap();
        let err = h
            .coordinator
            .create_rollout(request("ro-1", vec![stage(10, 1000, 600)]))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::AlreadyRegistered(_)));
        h.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn degrading_candidate_rolls_back_midway() {
        let source = ScriptedSource::new(&[("error_rate", 0.4)]);
        let h = harness(source);
        h.backend.seed("ro-1", TrafficSplit::all_baseline());

        h.coordinator
            .create_rollout(request("ro-1", vec![stage(10, 2, 600), stage(50, 1000, 600)]))
            .await
            .unwrap();

        // Stage 0 promotes on healthy data, then the candidate degrades.
        let rollout = loop {
            let r = h.store.get_rollout("ro-1").unwrap().unwrap();
            if r.current_stage == 1 {
                break r;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert_eq!(rollout.status, RolloutStatus::Progressing);
        h.source.set("error_rate", 5.0);

        let rollout = wait_for_status(&h.store, "ro-1", RolloutStatus::RolledBack).await;
        // Stage index never moved backwards.
        assert_eq!(rollout.current_stage, 1);
        assert_eq!(h.backend.split("ro-1").unwrap(), TrafficSplit::all_baseline());
        h.coordinator.shutdown().await;
    }
}
