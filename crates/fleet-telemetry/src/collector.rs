use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fleet_queue::WorkQueue;
use tokio::time::sleep;
use tracing::warn;

use crate::registry::MetricsRegistry;

const COLLECT_INTERVAL: Duration = Duration::from_secs(15);

/// §4.11: "A background collector task polls the work queue every 15s to
/// refresh queue depth gauges." Runs until `shutdown` is flipped.
pub async fn run_queue_depth_collector(
    registry: Arc<MetricsRegistry>,
    work_queue: Arc<WorkQueue>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::SeqCst) {
        if let Err(err) = refresh_once(&registry, &work_queue).await {
            warn!(error = %err, "queue_depth_collector_failed");
        }
        sleep(COLLECT_INTERVAL).await;
    }
}

async fn refresh_once(registry: &MetricsRegistry, work_queue: &WorkQueue) -> anyhow::Result<()> {
    for (priority, depth) in work_queue.lane_depths().await? {
        registry
            .queue_depth
            .with_label_values(&[priority.lane_name()])
            .set(depth as f64);
    }
    registry
        .queue_active_tasks
        .set(work_queue.active_count().await? as f64);
    registry
        .queue_agents_in_backoff
        .set(work_queue.backoff_count().await? as f64);
    Ok(())
}
