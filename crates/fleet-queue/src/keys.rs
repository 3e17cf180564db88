use fleet_types::Priority;

pub fn lane_key(priority: Priority) -> String {
    format!("work:queue:{}", priority.lane_name())
}

pub const ACTIVE: &str = "work:active";
pub const FAILURES: &str = "work:failures";
pub const BACKOFF: &str = "work:backoff";
