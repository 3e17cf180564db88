use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Coarse execution-strategy tag. Closed set — the runner looks this up to
/// pick one of a fixed set of executors; adding a variant means adding an
/// executor, not branching deeper into existing code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Conversational,
    Autonomous,
    Research,
}

const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// An opaque agent configuration record. The core only ever reads
/// `cache_ttl` and `agent_type`; everything else in `raw` is forwarded to
/// the activation callee untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,
    pub agent_type: AgentType,
    #[serde(flatten)]
    pub raw: Value,
}

fn default_cache_ttl() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

impl AgentConfig {
    pub fn cache_ttl_or_default(&self) -> u64 {
        if self.cache_ttl == 0 {
            DEFAULT_CACHE_TTL_SECS
        } else {
            self.cache_ttl
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_cache_ttl_falls_back_to_default() {
        let raw = r#"{"agent_type":"autonomous"}"#;
        let config: AgentConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.cache_ttl_or_default(), DEFAULT_CACHE_TTL_SECS);
    }
}
