//! Observability counters/gauges/histograms plus the HTTP endpoint set
//! exposing them (§4.11): `GET /metrics`, `GET /health`, `GET /ready`,
//! `POST /api/v1/cache/invalidate`, and the upstream-supplemented
//! `GET /api/v1/version`.

mod collector;
mod http;
mod registry;

pub use collector::run_queue_depth_collector;
pub use http::{router, TelemetryState};
pub use registry::MetricsRegistry;
