use std::time::Duration;

use serde_json::{json, Value};

fn env_duration_secs(name: &str, default_secs: u64) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(default_secs))
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_u16(name: &str, default: u16) -> u16 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(default)
}

/// Runner's view of the environment-derived configuration (§6 "Environment
/// variables (minimum set)"). Upstream config *file* formats are out of
/// scope; these are the ambient env vars every instance reads regardless.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub hub_url: String,
    pub hub_api_key: Option<String>,
    pub store_url: String,
    pub runner_id: String,
    pub poll_interval: Duration,
    pub claim_timeout: Duration,
    pub lock_ttl: Duration,
    pub activation_timeout: Duration,
    pub max_failures: u32,
    pub telemetry_port: u16,
    pub resource_caps: Value,
}

impl RunnerSettings {
    pub fn from_env() -> Self {
        Self {
            hub_url: std::env::var("HUB_URL").unwrap_or_else(|_| "http://localhost:8000".into()),
            hub_api_key: std::env::var("HUB_API_KEY").ok(),
            store_url: std::env::var("FLEET_STORE_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
            runner_id: std::env::var("RUNNER_ID").unwrap_or_else(|_| default_runner_id()),
            poll_interval: env_duration_secs("FLEET_POLL_INTERVAL_SECS", 15),
            claim_timeout: env_duration_secs("FLEET_CLAIM_TIMEOUT_SECS", 30),
            lock_ttl: env_duration_secs("FLEET_LOCK_TTL_SECS", 600),
            activation_timeout: env_duration_secs("FLEET_ACTIVATION_TIMEOUT_SECS", 300),
            max_failures: env_u32("FLEET_MAX_FAILURES", 5),
            telemetry_port: env_u16("FLEET_RUNNER_TELEMETRY_PORT", 9091),
            resource_caps: json!({
                "cpu_limit": std::env::var("SANDBOX_CPU_LIMIT").ok(),
                "memory_limit": std::env::var("SANDBOX_MEMORY_LIMIT").ok(),
            }),
        }
    }
}

/// `RUNNER_ID` env var, else hostname, else a PID-derived fallback —
/// matches §6's "falls back to hostname or PID-derived".
fn default_runner_id() -> String {
    if let Ok(hostname) = std::env::var("HOSTNAME") {
        if !hostname.is_empty() {
            return format!("runner-{hostname}");
        }
    }
    format!("runner-pid-{}", std::process::id())
}
