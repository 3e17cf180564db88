use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fleet_hub::{ConsumptionReport, Hub};
use tokio::sync::Mutex;
use tracing::warn;

use crate::pricing::cost_usd;

#[derive(Debug, Clone, PartialEq)]
pub struct UsageRecord {
    pub agent_id: String,
    pub model: Option<String>,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub duration: Duration,
    pub cost_usd: f64,
}

impl UsageRecord {
    pub fn new(
        agent_id: impl Into<String>,
        model: Option<String>,
        tokens_input: u64,
        tokens_output: u64,
        duration: Duration,
    ) -> Self {
        let cost = cost_usd(model.as_deref(), tokens_input, tokens_output);
        Self {
            agent_id: agent_id.into(),
            model,
            tokens_input,
            tokens_output,
            duration,
            cost_usd: cost,
        }
    }
}

#[derive(Default)]
struct Aggregate {
    tokens_input: u64,
    tokens_output: u64,
    cost_usd: f64,
}

/// Accumulates per-activation usage in memory and flushes one aggregated
/// consumption report per agent to the Hub on demand. Flush failures are
/// logged and dropped — best-effort, no re-queue.
pub struct MetricsCollector {
    hub: Arc<dyn Hub>,
    pending: Mutex<Vec<UsageRecord>>,
}

impl MetricsCollector {
    pub fn new(hub: Arc<dyn Hub>) -> Self {
        Self {
            hub,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub async fn record(&self, usage: UsageRecord) {
        self.pending.lock().await.push(usage);
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn flush(&self) -> usize {
        let records = std::mem::take(&mut *self.pending.lock().await);
        if records.is_empty() {
            return 0;
        }

        let mut by_agent: HashMap<String, Aggregate> = HashMap::new();
        for record in records {
            let entry = by_agent.entry(record.agent_id).or_default();
            entry.tokens_input += record.tokens_input;
            entry.tokens_output += record.tokens_output;
            entry.cost_usd += record.cost_usd;
        }

        let flushed = by_agent.len();
        for (agent_id, aggregate) in &by_agent {
            let report = ConsumptionReport {
                agent_id,
                tokens_input: aggregate.tokens_input,
                tokens_output: aggregate.tokens_output,
                cost_usd: aggregate.cost_usd,
            };
            if let Err(err) = self.hub.report_consumption(report).await {
                warn!(agent_id = %agent_id, error = %err, "consumption_report_failed");
            }
        }
        flushed
    }
}
