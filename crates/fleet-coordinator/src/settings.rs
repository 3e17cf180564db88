use std::time::Duration;

fn env_duration_secs(name: &str, default_secs: u64) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(default_secs))
}

fn env_u16(name: &str, default: u16) -> u16 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

/// Coordinator's view of the environment-derived configuration (§6
/// "Environment variables (minimum set)"), mirroring `RunnerSettings`.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub hub_url: String,
    pub hub_api_key: Option<String>,
    pub store_url: String,
    pub instance_id: String,
    pub leader_ttl: Duration,
    pub lock_ttl: Duration,
    pub max_failures: u32,
    /// Base interval the poll loop sleeps between Hub polls, jittered ±10%.
    pub poll_interval: Duration,
    /// Cadence for the additional "stale agents" sweep inside the poll loop.
    pub stale_sweep_interval: Duration,
    pub telemetry_port: u16,
    /// Opt-in active stale-lock cleanup (disabled by default; see
    /// DESIGN.md's "stale-lock handling" open-question resolution).
    pub stale_lock_cleanup_enabled: bool,
    pub stale_lock_cleanup_threshold: u32,
}

impl CoordinatorSettings {
    pub fn from_env() -> Self {
        Self {
            hub_url: std::env::var("HUB_URL").unwrap_or_else(|_| "http://localhost:8000".into()),
            hub_api_key: std::env::var("HUB_API_KEY").ok(),
            store_url: std::env::var("FLEET_STORE_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
            instance_id: std::env::var("COORDINATOR_ID").unwrap_or_else(|_| default_instance_id()),
            leader_ttl: env_duration_secs("FLEET_LEADER_TTL_SECS", 30),
            lock_ttl: env_duration_secs("FLEET_LOCK_TTL_SECS", 600),
            max_failures: env_u32("FLEET_MAX_FAILURES", 5),
            poll_interval: env_duration_secs("FLEET_POLL_INTERVAL_SECS", 15),
            stale_sweep_interval: env_duration_secs("FLEET_STALE_SWEEP_INTERVAL_SECS", 60),
            telemetry_port: env_u16("FLEET_COORDINATOR_TELEMETRY_PORT", 9090),
            stale_lock_cleanup_enabled: std::env::var("FLEET_STALE_LOCK_CLEANUP")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            stale_lock_cleanup_threshold: env_u32("FLEET_STALE_LOCK_CLEANUP_THRESHOLD", 3),
        }
    }
}

fn default_instance_id() -> String {
    if let Ok(hostname) = std::env::var("HOSTNAME") {
        if !hostname.is_empty() {
            return format!("coordinator-{hostname}");
        }
    }
    format!("coordinator-pid-{}", std::process::id())
}
