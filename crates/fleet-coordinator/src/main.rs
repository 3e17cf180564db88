mod coordinator;
mod settings;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use fleet_cache::{ConfigCache, ConfigLoader, FileConfigLoader};
use fleet_hub::{Hub, HubClient};
use fleet_observability::{init_process_logging, ProcessKind};
use fleet_queue::{WorkQueue, WorkQueueSettings};
use fleet_store::{RedisBackend, RedisBackendConfig, StoreBackend};
use fleet_telemetry::{router, run_queue_depth_collector, MetricsRegistry, TelemetryState};
use tracing::{error, info};

use crate::coordinator::Coordinator;
use crate::settings::CoordinatorSettings;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let logs_dir = std::env::var("FLEET_LOGS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./logs"));
    let (_log_guard, log_info) = init_process_logging(ProcessKind::Coordinator, &logs_dir, 14)
        .context("failed to initialize logging")?;
    info!(?log_info, "coordinator_logging_initialized");

    let settings = CoordinatorSettings::from_env();
    info!(instance_id = %settings.instance_id, "coordinator_starting");

    // §4.8 step 1: connect to store; initialize work queue, config cache,
    // and leader election. Unreachable store is fatal at startup.
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
    let config_loader: Arc<dyn ConfigLoader> = build_config_loader();
    let registry = Arc::new(MetricsRegistry::new().context("failed to build metrics registry")?);
    let shutdown = Arc::new(AtomicBool::new(false));

    let coordinator = Arc::new(
        Coordinator::new(
            settings.instance_id.clone(),
            settings.leader_ttl,
            settings.lock_ttl,
            settings.poll_interval,
            settings.stale_sweep_interval,
            store,
            hub,
            work_queue.clone(),
            config_cache.clone(),
            registry.clone(),
            shutdown.clone(),
        )
        .with_stale_lock_cleanup(settings.stale_lock_cleanup_enabled, settings.stale_lock_cleanup_threshold),
    );

    // §4.8 step 2: start telemetry endpoint.
    let telemetry_state = TelemetryState {
        registry: registry.clone(),
        cache: config_cache,
        process_name: "fleet-coordinator",
        version: env!("CARGO_PKG_VERSION"),
    };
    let telemetry_addr = format!("0.0.0.0:{}", settings.telemetry_port);
    let telemetry_listener = tokio::net::TcpListener::bind(&telemetry_addr)
        .await
        .with_context(|| format!("failed to bind telemetry listener on {telemetry_addr}"))?;
    info!(addr = %telemetry_addr, "coordinator_telemetry_listening");
    let telemetry_shutdown = shutdown.clone();
    let telemetry_task = tokio::spawn(async move {
        let app = router(telemetry_state);
        if let Err(err) = axum::serve(telemetry_listener, app)
            .with_graceful_shutdown(wait_for_flag(telemetry_shutdown))
            .await
        {
            error!(error = %err, "coordinator_telemetry_server_failed");
        }
    });

    // §4.8 step 3: four long-lived loops, concurrently.
    let leader_task = tokio::spawn(coordinator.clone().run_leader_loop(config_loader));
    let poll_task = tokio::spawn(coordinator.clone().run_poll_loop());
    let health_task = tokio::spawn(coordinator.clone().run_health_loop());
    let stats_task = tokio::spawn(coordinator.clone().run_stats_loop());
    let collector_task = tokio::spawn(run_queue_depth_collector(registry, work_queue, shutdown.clone()));

    wait_for_shutdown_signal().await.context("failed to wait for shutdown signal")?;
    info!("coordinator_shutdown_signal_received");
    coordinator.shutdown().await;

    let _ = tokio::join!(
        leader_task,
        poll_task,
        health_task,
        stats_task,
        collector_task,
        telemetry_task
    );
    info!("coordinator_shutdown_complete");
    Ok(())
}

fn build_config_loader() -> Arc<dyn ConfigLoader> {
    let dir = std::env::var("FLEET_CONFIG_DIR").unwrap_or_else(|_| "./agent-configs".into());
    Arc::new(FileConfigLoader::new(dir))
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
