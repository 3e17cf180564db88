//! Shared data model for the fleet orchestrator.
//!
//! Types here are pure data: no I/O, no store access. `fleet-queue`,
//! `fleet-cache`, `fleet-assigner` and friends serialize/deserialize these
//! across the coordination store.

mod config;
mod result;
mod work_item;

pub use config::{AgentConfig, AgentType};
pub use result::ActivationResult;
pub use work_item::{Assignment, Priority, TaskType, WorkItem};
