use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NotificationAgent {
    pub id: String,
    pub name: String,
    pub notification_count: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StaleAgent {
    pub id: String,
    pub name: String,
    pub last_activated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct BudgetHealth {
    pub daily_limit: f64,
    pub daily_used: f64,
    pub monthly_limit: f64,
    pub monthly_used: f64,
    pub healthy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConsumptionReport<'a> {
    pub agent_id: &'a str,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub cost_usd: f64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AgentsEnvelope<T> {
    pub agents: Vec<T>,
}
