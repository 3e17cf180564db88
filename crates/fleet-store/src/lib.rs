//! Coordination store adapter (§4.1), distributed lock (§4.2) and leader
//! election (§4.3).
//!
//! Every other crate in the workspace talks to the external store through
//! the [`StoreBackend`] trait, never through a concrete Redis type. Tests
//! use [`memory::InMemoryBackend`]; production wiring uses
//! [`redis_backend::RedisBackend`].

mod backend;
mod error;
mod leader;
mod lock;
mod memory;
mod redis_backend;

pub use backend::StoreBackend;
pub use error::StoreError;
pub use leader::LeaderElection;
pub use lock::{lock_key, DistributedLock};
pub use memory::InMemoryBackend;
pub use redis_backend::{RedisBackend, RedisBackendConfig};
