mod executors;
mod runner;
mod settings;
mod state_machine;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use fleet_cache::{ConfigCache, FileConfigLoader};
use fleet_hub::{Hub, HubClient};
use fleet_observability::{init_process_logging, ProcessKind};
use fleet_queue::{WorkQueue, WorkQueueSettings};
use fleet_sandbox::{ActivationExecutor, LocalSandboxFactory, ProcessActivationExecutor, SandboxFactory};
use fleet_store::{RedisBackend, RedisBackendConfig, StoreBackend};
use fleet_telemetry::{router, MetricsRegistry, TelemetryState};
use tracing::{error, info};

use crate::executors::ExecutorRegistry;
use crate::runner::Runner;
use crate::settings::RunnerSettings;

const METRICS_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let logs_dir = std::env::var("FLEET_LOGS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./logs"));
    let (_log_guard, log_info) = init_process_logging(ProcessKind::Runner, &logs_dir, 14)
        .context("failed to initialize logging")?;
    info!(?log_info, "runner_logging_initialized");

    let settings = RunnerSettings::from_env();
    info!(runner_id = %settings.runner_id, "runner_starting");

    // Coordination store is the only fatal-at-startup dependency (§7): if
    // it is unreachable we refuse to start rather than limp along.
    let store: Arc<dyn StoreBackend> = Arc::new(
        RedisBackend::connect(RedisBackendConfig::new(settings.store_url.clone()))
            .await
            .context("failed to connect to coordination store")?,
    );
    store.ping().await.context("coordination store ping failed")?;

    let hub: Arc<dyn Hub> = Arc::new(
        HubClient::new(settings.hub_url.clone(), settings.hub_api_key.clone())
            .context("failed to build hub http client")?,
    );

    let work_queue = Arc::new(WorkQueue::new(
        store.clone(),
        WorkQueueSettings {
            max_failures: settings.max_failures,
            ..WorkQueueSettings::default()
        },
    ));
    let config_cache = Arc::new(ConfigCache::new(store.clone()));
    let config_loader = build_config_loader();
    let sandbox_factory = build_sandbox_factory();
    let executors = build_executor_registry();
    let registry = Arc::new(MetricsRegistry::new().context("failed to build metrics registry")?);
    let shutdown = Arc::new(AtomicBool::new(false));

    let runner = Arc::new(Runner::new(
        settings.runner_id.clone(),
        settings.claim_timeout,
        settings.lock_ttl,
        settings.activation_timeout,
        settings.resource_caps.clone(),
        store.clone(),
        hub,
        work_queue,
        config_cache.clone(),
        config_loader,
        sandbox_factory,
        executors,
        registry.clone(),
        shutdown.clone(),
    ));

    let telemetry_state = TelemetryState {
        registry: registry.clone(),
        cache: config_cache,
        process_name: "fleet-runner",
        version: env!("CARGO_PKG_VERSION"),
    };
    let telemetry_addr = format!("0.0.0.0:{}", settings.telemetry_port);
    let telemetry_listener = tokio::net::TcpListener::bind(&telemetry_addr)
        .await
        .with_context(|| format!("failed to bind telemetry listener on {telemetry_addr}"))?;
    info!(addr = %telemetry_addr, "runner_telemetry_listening");
    let telemetry_shutdown = shutdown.clone();
    let telemetry_task = tokio::spawn(async move {
        let app = router(telemetry_state);
        if let Err(err) = axum::serve(telemetry_listener, app)
            .with_graceful_shutdown(wait_for_flag(telemetry_shutdown))
            .await
        {
            error!(error = %err, "runner_telemetry_server_failed");
        }
    });

    let claim_task = tokio::spawn(runner.clone().run_claim_loop());
    let heartbeat_task = tokio::spawn(runner.clone().run_heartbeat_loop());
    let flush_task = tokio::spawn(runner.clone().run_metrics_flush_loop(METRICS_FLUSH_INTERVAL));

    wait_for_shutdown_signal().await.context("failed to wait for shutdown signal")?;
    info!("runner_shutdown_signal_received");
    shutdown.store(true, Ordering::SeqCst);

    let _ = tokio::join!(claim_task, heartbeat_task, flush_task, telemetry_task);
    runner.flush_metrics().await;
    info!("runner_shutdown_complete");
    Ok(())
}

fn build_config_loader() -> Arc<dyn fleet_cache::ConfigLoader> {
    let dir = std::env::var("FLEET_CONFIG_DIR").unwrap_or_else(|_| "./agent-configs".into());
    Arc::new(FileConfigLoader::new(dir))
}

/// Production default is filesystem-isolated local execution (§9 "Dynamic
/// dispatch"); a containerized sandbox is a deployment concern plugged in
/// at this same `SandboxFactory` seam.
fn build_sandbox_factory() -> Arc<dyn SandboxFactory> {
    let root = std::env::var("FLEET_SANDBOX_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("fleet-sandboxes"));
    Arc::new(LocalSandboxFactory::new(root))
}

/// The activation executor — the opaque agentic-loop collaborator (§1(b))
/// — is a subprocess invoked uniformly regardless of `AgentType`; per-type
/// specialization would be added here as additional `ExecutorRegistry`
/// entries without touching the state machine.
fn build_executor_registry() -> ExecutorRegistry {
    let command = std::env::var("FLEET_ACTIVATION_COMMAND").unwrap_or_else(|_| "fleet-activation-executor".into());
    let args = std::env::var("FLEET_ACTIVATION_ARGS")
        .ok()
        .map(|raw| raw.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    let executor: Arc<dyn ActivationExecutor> = Arc::new(ProcessActivationExecutor::new(command, args));
    ExecutorRegistry::new(executor)
}

async fn wait_for_flag(flag: Arc<AtomicBool>) {
    while !flag.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await.context("failed to wait for ctrl_c")?;
    Ok(())
}
