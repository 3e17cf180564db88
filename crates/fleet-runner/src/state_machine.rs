use std::time::{Duration, Instant};

use fleet_assigner::Assigner;
use fleet_cache::{ConfigCache, ConfigLoader};
use fleet_metrics::{BudgetGate, MetricsCollector, UsageRecord};
use fleet_queue::WorkQueue;
use fleet_sandbox::{ActivationRequest, SandboxFactory};
use fleet_observability::{emit_event, ActivationEvent, ProcessKind};
use fleet_types::{ActivationResult, WorkItem};
use tracing::{info, warn, Level};

use crate::executors::ExecutorRegistry;

/// §4.9's S0..S6 activation state machine, named for readability at call
/// sites and in logs; the driver below advances through them in order and
/// never returns before reaching `Released`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
    Claimed,
    BudgetChecked,
    ConfigLoaded,
    SandboxStarted,
    Executed,
    Released,
}

pub struct ActivationCollaborators<'a> {
    pub runner_id: &'a str,
    pub assigner: &'a Assigner,
    pub work_queue: &'a WorkQueue,
    pub config_cache: &'a ConfigCache,
    pub config_loader: &'a dyn ConfigLoader,
    pub budget_gate: &'a BudgetGate,
    pub sandbox_factory: &'a dyn SandboxFactory,
    pub executors: &'a ExecutorRegistry,
    pub metrics: &'a MetricsCollector,
    pub activation_timeout: Duration,
    pub resource_caps: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ActivationOutcome {
    pub result: ActivationResult,
    /// `true` only when the terminal state was reached because a
    /// concurrent runner already held the lock — the caller must not run
    /// `work_queue.complete` again for this outcome (already handled).
    pub lock_race: bool,
}

/// Drives one `WorkItem` through the full S1..S6 state machine, performing
/// every side effect the transition table in §4.9 specifies: lock acquire,
/// budget gate, config load (cache-consulting), sandbox start/execute/stop,
/// lock release, queue completion, and usage recording.
pub async fn drive_activation(item: WorkItem, collab: &ActivationCollaborators<'_>) -> ActivationOutcome {
    let agent_id = item.agent_id.clone();
    let agent_name = item.agent_name.clone();
    let task_type = item.task_type;

    mark_in_progress(collab.runner_id, &agent_id, ActivationState::Claimed);

    // S0 -> S1: acquire the lock. A race loses the item without burning a
    // circuit-breaker strike (§4.9 S1 "no-retry-burn").
    let claimed = match collab.assigner.try_claim(item.clone(), collab.runner_id).await {
        Ok(claimed) => claimed,
        Err(err) => {
            warn!(agent_id = %agent_id, error = %err, "lock_acquire_failed");
            None
        }
    };
    if claimed.is_none() {
        if let Err(err) = collab.work_queue.release_active_only(&agent_id).await {
            warn!(agent_id = %agent_id, error = %err, "release_active_only_failed_after_lock_race");
        }
        return ActivationOutcome {
            result: ActivationResult::failure(&agent_id, "lock acquire race, another runner claimed first"),
            lock_race: true,
        };
    }

    // S1 -> S2 / S6: budget gate.
    mark_in_progress(collab.runner_id, &agent_id, ActivationState::BudgetChecked);
    let decision = collab.budget_gate.check(&agent_id).await;
    if !decision.proceed {
        info!(agent_id = %agent_id, reason = %decision.reason, "activation_budget_blocked");
        let result = ActivationResult::failure(&agent_id, decision.reason);
        return terminate(&agent_id, collab, result, false).await;
    }

    // S2 -> S3 / S6: cache-consulting config load.
    let config = match load_config(collab, &agent_id).await {
        Ok(config) => config,
        Err(err) => {
            warn!(agent_id = %agent_id, error = %err, "config_load_failed");
            let result = ActivationResult::failure(&agent_id, format!("config load error: {err}"));
            return terminate(&agent_id, collab, result, false).await;
        }
    };

    mark_in_progress(collab.runner_id, &agent_id, ActivationState::ConfigLoaded);
    let request = ActivationRequest {
        agent_id: agent_id.clone(),
        agent_name,
        task_type,
        config: config.clone(),
        resource_caps: collab.resource_caps.clone(),
    };

    // S3 -> S4 / S6: sandbox start.
    let sandbox = match collab.sandbox_factory.create(&request).await {
        Ok(sandbox) => sandbox,
        Err(err) => {
            warn!(agent_id = %agent_id, error = %err, "sandbox_create_failed");
            let result = ActivationResult::failure(&agent_id, format!("sandbox create error: {err}"));
            return terminate(&agent_id, collab, result, false).await;
        }
    };
    if let Err(err) = sandbox.start().await {
        warn!(agent_id = %agent_id, error = %err, "sandbox_start_failed");
        let result = ActivationResult::failure(&agent_id, format!("sandbox start error: {err}"));
        return terminate(&agent_id, collab, result, false).await;
    }

    mark_in_progress(collab.runner_id, &agent_id, ActivationState::SandboxStarted);

    // S4 -> S5: run the opaque activation executor, bounded by
    // `activation_timeout`. A timeout is treated as a failed execution that
    // still must stop the sandbox.
    let executor = collab.executors.resolve(config.agent_type);
    let started = Instant::now();
    let executed = tokio::time::timeout(collab.activation_timeout, executor.execute(&request)).await;

    let result = match executed {
        Ok(Ok(mut result)) => {
            result.duration = started.elapsed();
            result
        }
        Ok(Err(err)) => {
            warn!(agent_id = %agent_id, error = %err, "activation_executor_failed");
            let mut result = ActivationResult::failure(&agent_id, format!("activation executor error: {err}"));
            result.duration = started.elapsed();
            result
        }
        Err(_) => {
            warn!(agent_id = %agent_id, timeout = ?collab.activation_timeout, "activation_timed_out");
            let mut result = ActivationResult::failure(&agent_id, "activation timed out");
            result.duration = collab.activation_timeout;
            result
        }
    };

    if let Err(err) = sandbox.stop().await {
        warn!(agent_id = %agent_id, error = %err, "sandbox_stop_failed");
    }
    mark_in_progress(collab.runner_id, &agent_id, ActivationState::Executed);

    if result.success {
        collab
            .metrics
            .record(UsageRecord::new(
                agent_id.clone(),
                result.model.clone(),
                result.tokens_input,
                result.tokens_output,
                result.duration,
            ))
            .await;
    }

    terminate(&agent_id, collab, result, true).await
}

/// S5/S6 -> Released: release the lock, complete the work item, and return
/// the outcome. `lock_was_held` is `false` for every early-exit path (S1
/// budget block through S3 sandbox-create failure) where the lock was
/// acquired but no further side effect beyond release/complete applies.
async fn terminate(
    agent_id: &str,
    collab: &ActivationCollaborators<'_>,
    result: ActivationResult,
    _lock_was_held: bool,
) -> ActivationOutcome {
    let released = collab
        .assigner
        .release(agent_id, collab.runner_id, Some(result.clone()))
        .await
        .unwrap_or_else(|err| {
            warn!(agent_id = %agent_id, error = %err, "assigner_release_failed");
            false
        });
    if !released {
        warn!(agent_id = %agent_id, "release_reported_non_ownership_at_terminal_state");
    }
    mark_in_progress(collab.runner_id, agent_id, ActivationState::Released);

    if !result.success {
        emit_event(
            Level::WARN,
            ProcessKind::Runner,
            ActivationEvent {
                event: "activation_failed",
                component: "state_machine",
                agent_id: Some(agent_id),
                runner_id: Some(collab.runner_id),
                task_type: None,
                priority: None,
                status: Some("failed"),
                error_code: None,
                detail: result.error_message.as_deref(),
            },
        );
    }

    ActivationOutcome {
        result,
        lock_race: false,
    }
}

async fn load_config(
    collab: &ActivationCollaborators<'_>,
    agent_id: &str,
) -> anyhow::Result<fleet_types::AgentConfig> {
    if let Some(config) = collab.config_cache.get(agent_id).await? {
        return Ok(config);
    }
    let config = collab.config_loader.load(agent_id).await?;
    collab.config_cache.set(agent_id, &config, None).await?;
    Ok(config)
}

/// `work_queue.complete` already ran implicitly (via `release_active_only`)
/// for a lock-race outcome, so the caller must not burn a second strike by
/// calling `complete` again.
pub async fn complete_work_item(
    work_queue: &WorkQueue,
    item: &WorkItem,
    outcome: &ActivationOutcome,
) -> Result<(), fleet_queue::QueueError> {
    if outcome.lock_race {
        return Ok(());
    }
    work_queue.complete(item, outcome.result.success).await
}

fn mark_in_progress(runner_id: &str, agent_id: &str, state: ActivationState) {
    emit_event(
        Level::INFO,
        ProcessKind::Runner,
        ActivationEvent {
            event: "state_transition",
            component: "state_machine",
            agent_id: Some(agent_id),
            runner_id: Some(runner_id),
            task_type: None,
            priority: None,
            status: Some(state_label(state)),
            error_code: None,
            detail: None,
        },
    );
}

fn state_label(state: ActivationState) -> &'static str {
    match state {
        ActivationState::Claimed => "claimed",
        ActivationState::BudgetChecked => "budget_checked",
        ActivationState::ConfigLoaded => "config_loaded",
        ActivationState::SandboxStarted => "sandbox_started",
        ActivationState::Executed => "executed",
        ActivationState::Released => "released",
    }
}
