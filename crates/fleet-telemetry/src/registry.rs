use prometheus::{
    histogram_opts, opts, register_counter_vec_with_registry, register_gauge_vec_with_registry,
    register_gauge_with_registry, register_histogram_vec_with_registry,
    register_histogram_with_registry, CounterVec, Gauge, GaugeVec, Histogram, HistogramVec,
    Registry, TextEncoder,
};

const ACTIVATION_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0];
const POLL_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.0, 5.0, 10.0];

/// Every counter/gauge/histogram from spec §4.11, registered once at
/// process start and shared behind an `Arc` for the lifetime of the
/// process. There is no global registry singleton — each coordinator or
/// runner process owns exactly one `MetricsRegistry`.
pub struct MetricsRegistry {
    registry: Registry,

    pub activations_total: CounterVec,
    pub tokens_consumed_total: CounterVec,
    pub activation_cost_usd_total: CounterVec,
    pub activation_retries_total: CounterVec,

    pub activations_in_progress: GaugeVec,
    pub queue_depth: GaugeVec,
    pub queue_active_tasks: Gauge,
    pub queue_agents_in_backoff: Gauge,
    pub runner_heartbeat_timestamp: GaugeVec,
    pub coordinator_is_leader: GaugeVec,
    pub budget_used_usd: GaugeVec,
    pub budget_limit_usd: GaugeVec,
    pub budget_health_ratio: GaugeVec,
    pub agent_backoff_seconds_remaining: GaugeVec,

    pub activation_duration_seconds: HistogramVec,
    pub poll_duration_seconds: Histogram,
    pub queue_wait_seconds: HistogramVec,
}

impl MetricsRegistry {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let activations_total = register_counter_vec_with_registry!(
            opts!("activations_total", "Total activations by outcome"),
            &["agent", "task_type", "status"],
            registry
        )?;
        let tokens_consumed_total = register_counter_vec_with_registry!(
            opts!("tokens_consumed_total", "Tokens consumed by direction"),
            &["agent", "model", "direction"],
            registry
        )?;
        let activation_cost_usd_total = register_counter_vec_with_registry!(
            opts!("activation_cost_usd_total", "Cumulative USD cost of activations"),
            &["agent", "model"],
            registry
        )?;
        let activation_retries_total = register_counter_vec_with_registry!(
            opts!("activation_retries_total", "Activation retries (always zero: retry is not automatic)"),
            &["agent"],
            registry
        )?;

        let activations_in_progress = register_gauge_vec_with_registry!(
            opts!("activations_in_progress", "Activations currently running per runner"),
            &["runner"],
            registry
        )?;
        let queue_depth = register_gauge_vec_with_registry!(
            opts!("queue_depth", "Work queue lane depth"),
            &["priority"],
            registry
        )?;
        let queue_active_tasks = register_gauge_with_registry!(
            opts!("queue_active_tasks", "Agents currently claimed"),
            registry
        )?;
        let queue_agents_in_backoff = register_gauge_with_registry!(
            opts!("queue_agents_in_backoff", "Agents currently quarantined"),
            registry
        )?;
        let runner_heartbeat_timestamp = register_gauge_vec_with_registry!(
            opts!("runner_heartbeat_timestamp", "Unix timestamp of the runner's last heartbeat"),
            &["runner"],
            registry
        )?;
        let coordinator_is_leader = register_gauge_vec_with_registry!(
            opts!("coordinator_is_leader", "1 if this instance currently holds leadership"),
            &["instance"],
            registry
        )?;
        let budget_used_usd = register_gauge_vec_with_registry!(
            opts!("budget_used_usd", "Budget consumed this period"),
            &["agent", "period"],
            registry
        )?;
        let budget_limit_usd = register_gauge_vec_with_registry!(
            opts!("budget_limit_usd", "Budget limit for this period"),
            &["agent", "period"],
            registry
        )?;
        let budget_health_ratio = register_gauge_vec_with_registry!(
            opts!("budget_health_ratio", "used/limit ratio for this period"),
            &["agent", "period"],
            registry
        )?;
        let agent_backoff_seconds_remaining = register_gauge_vec_with_registry!(
            opts!("agent_backoff_seconds_remaining", "Seconds until an agent's backoff deadline elapses"),
            &["agent"],
            registry
        )?;

        let activation_duration_seconds = register_histogram_vec_with_registry!(
            "activation_duration_seconds",
            "Activation wall-clock duration",
            &["agent", "task_type"],
            ACTIVATION_BUCKETS.to_vec(),
            registry
        )?;
        let poll_duration_seconds = register_histogram_with_registry!(
            histogram_opts!(
                "poll_duration_seconds",
                "Hub poll round-trip duration",
                POLL_BUCKETS.to_vec()
            ),
            registry
        )?;
        let queue_wait_seconds = register_histogram_vec_with_registry!(
            "queue_wait_seconds",
            "Time an item spent queued before being claimed",
            &["agent", "priority"],
            ACTIVATION_BUCKETS.to_vec(),
            registry
        )?;

        Ok(Self {
            registry,
            activations_total,
            tokens_consumed_total,
            activation_cost_usd_total,
            activation_retries_total,
            activations_in_progress,
            queue_depth,
            queue_active_tasks,
            queue_agents_in_backoff,
            runner_heartbeat_timestamp,
            coordinator_is_leader,
            budget_used_usd,
            budget_limit_usd,
            budget_health_ratio,
            agent_backoff_seconds_remaining,
            activation_duration_seconds,
            poll_duration_seconds,
            queue_wait_seconds,
        })
    }

    /// Text exposition for `GET /metrics` (HELP/TYPE comments included by
    /// the encoder).
    pub fn encode(&self) -> anyhow::Result<String> {
        let families = self.registry.gather();
        let mut buf = String::new();
        TextEncoder::new().encode_utf8(&families, &mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_includes_every_registered_metric_name() {
        let registry = MetricsRegistry::new().unwrap();
        registry
            .activations_total
            .with_label_values(&["a1", "inbox", "success"])
            .inc();
        registry.queue_depth.with_label_values(&["high"]).set(3.0);
        registry
            .activation_duration_seconds
            .with_label_values(&["a1", "inbox"])
            .observe(12.5);

        let text = registry.encode().unwrap();
        assert!(text.contains("activations_total"));
        assert!(text.contains("queue_depth"));
        assert!(text.contains("activation_duration_seconds"));
    }
}
