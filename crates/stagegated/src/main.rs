//! stagegated — the StageGate daemon.
//!
//! Single binary that assembles the progressive-delivery control plane:
//! - State store (redb)
//! - Pre-deploy policy gate
//! - Signal aggregator over a telemetry source
//! - Canary evaluator + rollout control loops
//! - Rollback executor
//!
//! # Usage
//!
//! ```text
//! stagegated validate --manifest deploy.toml --environment prod.toml
//! stagegated run --config rollout.toml --data-dir /var/lib/stagegate
//! ```

mod config;
mod sim;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use stagegate_controller::{Coordinator, LogSink, MemoryBackend, RolloutRequest, TrafficSplit};
use stagegate_gate::{DeploymentManifest, PreDeployGate, TargetEnvironment};
use stagegate_state::StateStore;

use config::DaemonConfig;
use sim::SimTelemetry;

#[derive(Parser)]
#[command(name = "stagegated", about = "StageGate progressive delivery daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a deployment manifest against an environment's policy
    /// rules without creating anything.
    Validate {
        /// Deployment manifest (TOML).
        #[arg(long)]
        manifest: PathBuf,

        /// Target environment definition (TOML).
        #[arg(long)]
        environment: PathBuf,

        /// Emit the gate result as JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Run one rollout end to end against simulated telemetry.
    Run {
        /// Rollout configuration (TOML).
        #[arg(long)]
        config: PathBuf,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/stagegate")]
        data_dir: PathBuf,

        /// Override the configured telemetry profile.
        #[arg(long, value_enum)]
        profile: Option<sim::TelemetryProfile>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,stagegated=debug,stagegate=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate {
            manifest,
            environment,
            json,
        } => run_validate(&manifest, &environment, json),
        Command::Run {
            config,
            data_dir,
            profile,
        } => run_rollout(&config, &data_dir, profile).await,
    }
}

/// Evaluate the pre-deploy gate and report every violation at once.
fn run_validate(
    manifest_path: &PathBuf,
    environment_path: &PathBuf,
    json: bool,
) -> anyhow::Result<()> {
    let manifest = DeploymentManifest::from_toml_file(manifest_path)?;
    let environment = TargetEnvironment::from_toml_file(environment_path)?;

    let gate = PreDeployGate::default();
    let result = gate.evaluate(&manifest, &environment, epoch_secs());

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        if result.passed() {
            return Ok(());
        }
        anyhow::bail!("pre-deploy validation failed");
    }

    if result.passed() {
        info!(
            service = %manifest.service,
            environment = %environment.name,
            "manifest passed all policy rules"
        );
        println!("PASS: {} -> {}", manifest.service, environment.name);
        return Ok(());
    }

    println!(
        "FAIL: {} -> {} ({} violation(s))",
        manifest.service,
        environment.name,
        result.violations.len()
    );
    for violation in &result.violations {
        println!("  {}: {}", violation.rule, violation.message);
    }
    anyhow::bail!("pre-deploy validation failed");
}

async fn run_rollout(
    config_path: &PathBuf,
    data_dir: &PathBuf,
    profile_override: Option<sim::TelemetryProfile>,
) -> anyhow::Result<()> {
    info!("StageGate daemon starting");

    let config = DaemonConfig::from_toml_file(config_path)?;
    let profile = profile_override.unwrap_or(config.telemetry.profile);

    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("stagegate.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let telemetry = Arc::new(SimTelemetry::new(
        profile,
        config.telemetry.base_error_rate,
        config.telemetry.base_latency_ms,
    ));
    info!(?profile, "simulated telemetry source initialized");

    // All candidate traffic starts at zero.
    let backend = Arc::new(MemoryBackend::new());
    backend.seed(&config.rollout.id, TrafficSplit::all_baseline());

    let coordinator = Coordinator::new(
        store.clone(),
        telemetry,
        backend.clone(),
        Arc::new(LogSink),
        PreDeployGate::default(),
        config.control.to_control_config(),
    );

    let rollout_id = config.rollout.id.clone();
    coordinator
        .create_rollout(RolloutRequest {
            id: config.rollout.id,
            service: config.rollout.service,
            baseline_version: config.rollout.baseline_version,
            candidate_version: config.rollout.candidate_version,
            stages: config.rollout.stages,
            manifest: config.manifest,
            environment: config.environment,
        })
        .await?;
    info!(rollout = %rollout_id, "rollout created");

    // Run until the rollout settles or the operator interrupts.
    let outcome = tokio::select! {
        rollout = wait_terminal(&store, &rollout_id) => rollout?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            coordinator.shutdown().await;
            return Ok(());
        }
    };
    coordinator.shutdown().await;

    let verdicts = store.list_verdicts(&rollout_id)?;
    let transitions = store.list_transitions(&rollout_id)?;
    info!(
        rollout = %rollout_id,
        status = %outcome.status,
        stage = outcome.current_stage,
        verdicts = verdicts.len(),
        transitions = transitions.len(),
        "rollout settled"
    );
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    let split = backend.split(&rollout_id).unwrap_or(TrafficSplit::all_baseline());
    println!(
        "final traffic split: baseline {}% / candidate {}%",
        split.baseline_weight, split.candidate_weight
    );
    Ok(())
}

/// Poll the store until the rollout reaches a terminal status.
async fn wait_terminal(store: &StateStore, rollout_id: &str) -> anyhow::Result<stagegate_state::Rollout> {
    loop {
        let rollout = store
            .get_rollout(rollout_id)?
            .ok_or_else(|| anyhow::anyhow!("rollout {rollout_id} disappeared"))?;
        if rollout.status.is_terminal() {
            return Ok(rollout);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
