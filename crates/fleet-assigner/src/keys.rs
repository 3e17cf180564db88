pub fn activation_key(agent_id: &str) -> String {
    format!("agent:activation:{agent_id}")
}

pub fn heartbeat_key(runner_id: &str) -> String {
    format!("runner:heartbeat:{runner_id}")
}

pub const RESULTS_RING: &str = "activation:results";
pub const RESULTS_RING_CAP: usize = 1000;

pub const LOCK_PREFIX: &str = "agent_lock:";
pub const HEARTBEAT_PREFIX: &str = "runner:heartbeat:";
