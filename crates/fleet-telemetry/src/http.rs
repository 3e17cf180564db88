use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fleet_cache::ConfigCache;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::registry::MetricsRegistry;

#[derive(Clone)]
pub struct TelemetryState {
    pub registry: Arc<MetricsRegistry>,
    pub cache: Arc<ConfigCache>,
    pub process_name: &'static str,
    pub version: &'static str,
}

/// Builds the §4.11 / §6 endpoint set: `/metrics`, `/health`, `/ready`,
/// `/api/v1/cache/invalidate`, plus the upstream-supplemented
/// `/api/v1/version`. Bind with `axum::serve` against `0.0.0.0:<port>`.
pub fn router(state: TelemetryState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/api/v1/version", get(version))
        .route("/api/v1/cache/invalidate", post(invalidate_cache))
        .with_state(state)
}

async fn metrics(State(state): State<TelemetryState>) -> Response {
    match state.registry.encode() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(err) => {
            error!(error = %err, "metrics_encode_failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error", "error": err.to_string()})),
            )
                .into_response()
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "healthy"}))
}

async fn ready() -> Json<serde_json::Value> {
    Json(json!({"status": "ready"}))
}

async fn version(State(state): State<TelemetryState>) -> Json<serde_json::Value> {
    Json(json!({"name": state.process_name, "version": state.version}))
}

#[derive(Debug, Deserialize)]
struct InvalidateQuery {
    agent: Option<String>,
}

async fn invalidate_cache(
    State(state): State<TelemetryState>,
    Query(query): Query<InvalidateQuery>,
) -> Response {
    match query.agent {
        Some(agent_id) => match state.cache.invalidate(&agent_id).await {
            Ok(()) => Json(json!({"status": "ok", "invalidated": agent_id})).into_response(),
            Err(err) => {
                error!(agent_id = %agent_id, error = %err, "cache_invalidate_failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"status": "error", "error": err.to_string()})),
                )
                    .into_response()
            }
        },
        None => match state.cache.invalidate_all().await {
            Ok(count) => Json(json!({"status": "ok", "invalidated": count})).into_response(),
            Err(err) => {
                error!(error = %err, "cache_invalidate_all_failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"status": "error", "error": err.to_string()})),
                )
                    .into_response()
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_store::InMemoryBackend;
    use http_body_util::BodyExt;
    use std::sync::Arc as StdArc;
    use tower::ServiceExt;

    fn state() -> TelemetryState {
        TelemetryState {
            registry: StdArc::new(MetricsRegistry::new().unwrap()),
            cache: StdArc::new(ConfigCache::new(StdArc::new(InMemoryBackend::new()))),
            process_name: "fleet-runner",
            version: "0.1.0",
        }
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_reports_healthy() {
        let app = router(state());
        let req = axum::http::Request::builder()
            .uri("/health")
            .body(axum::body::Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let payload = body_json(resp).await;
        assert_eq!(payload["status"], "healthy");
    }

    #[tokio::test]
    async fn ready_endpoint_reports_ready() {
        let app = router(state());
        let req = axum::http::Request::builder()
            .uri("/ready")
            .body(axum::body::Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let payload = body_json(resp).await;
        assert_eq!(payload["status"], "ready");
    }

    #[tokio::test]
    async fn version_endpoint_reports_name_and_version() {
        let app = router(state());
        let req = axum::http::Request::builder()
            .uri("/api/v1/version")
            .body(axum::body::Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let payload = body_json(resp).await;
        assert_eq!(payload["name"], "fleet-runner");
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_text_exposition() {
        let app_state = state();
        app_state
            .registry
            .activations_total
            .with_label_values(&["a1", "inbox", "success"])
            .inc();
        let app = router(app_state);
        let req = axum::http::Request::builder()
            .uri("/metrics")
            .body(axum::body::Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("activations_total"));
    }

    #[tokio::test]
    async fn invalidate_without_agent_clears_everything() {
        let app_state = state();
        let config: fleet_types::AgentConfig = serde_json::from_value(serde_json::json!({
            "cache_ttl": 60,
            "agent_type": "autonomous",
        }))
        .unwrap();
        app_state.cache.set("a1", &config, None).await.unwrap();

        let app = router(app_state.clone());
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/api/v1/cache/invalidate")
            .body(axum::body::Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(app_state.cache.get("a1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalidate_with_agent_clears_one_entry() {
        let app_state = state();
        let config: fleet_types::AgentConfig = serde_json::from_value(serde_json::json!({
            "cache_ttl": 60,
            "agent_type": "autonomous",
        }))
        .unwrap();
        app_state.cache.set("a1", &config, None).await.unwrap();
        app_state.cache.set("a2", &config, None).await.unwrap();

        let app = router(app_state.clone());
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/api/v1/cache/invalidate?agent=a1")
            .body(axum::body::Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(app_state.cache.get("a1").await.unwrap().is_none());
        assert!(app_state.cache.get("a2").await.unwrap().is_some());
    }
}
