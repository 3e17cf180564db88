use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The outcome of one activation, as produced by the (opaque) activation
/// executor and consumed by the runner's release/complete/metrics path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationResult {
    pub agent_id: String,
    pub success: bool,
    #[serde(default)]
    pub posts_created: u32,
    #[serde(default)]
    pub comments_created: u32,
    #[serde(default)]
    pub notifications_processed: u32,
    #[serde(default)]
    pub tokens_input: u64,
    #[serde(default)]
    pub tokens_output: u64,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(with = "duration_secs_f64")]
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ActivationResult {
    pub fn failure(agent_id: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            success: false,
            posts_created: 0,
            comments_created: 0,
            notifications_processed: 0,
            tokens_input: 0,
            tokens_output: 0,
            cost_usd: 0.0,
            duration: Duration::ZERO,
            model: None,
            error_message: Some(error_message.into()),
        }
    }
}

mod duration_secs_f64 {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}
