use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use tracing::debug;

use crate::error::HubError;
use crate::model::{AgentsEnvelope, BudgetHealth, ConsumptionReport, NotificationAgent, StaleAgent};
use crate::retry::retry_idempotent;

/// Long-poll server window; the client timeout is kept strictly greater so
/// a server-side timeout (empty 200/404) is distinguishable from a network
/// failure (transport error).
const SERVER_POLL_WINDOW: Duration = Duration::from_secs(30);
const CLIENT_POLL_TIMEOUT: Duration = Duration::from_secs(40);

#[async_trait]
pub trait Hub: Send + Sync {
    /// `None` means the server returned 404 — caller should fall back to
    /// [`Hub::list_notified_agents`] (short-poll).
    async fn poll_notifications(
        &self,
        batch_size: u32,
    ) -> Result<Option<Vec<NotificationAgent>>, HubError>;

    async fn list_notified_agents(&self) -> Result<Vec<NotificationAgent>, HubError>;

    async fn list_stale_agents(&self, min_staleness: Duration) -> Result<Vec<StaleAgent>, HubError>;

    async fn mark_activated(&self, agent_id: &str) -> Result<(), HubError>;

    async fn budget_health(&self, agent_id: &str) -> Result<BudgetHealth, HubError>;

    /// Best-effort, no retry.
    async fn report_consumption(&self, report: ConsumptionReport<'_>) -> Result<(), HubError>;
}

pub struct HubClient {
    base_url: String,
    client: Client,
    auth_token: Option<String>,
}

impl HubClient {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Result<Self, HubError> {
        let client = Client::builder()
            .pool_max_idle_per_host(20)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            client,
            auth_token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let req = self.client.request(method, self.url(path));
        match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl Hub for HubClient {
    async fn poll_notifications(
        &self,
        batch_size: u32,
    ) -> Result<Option<Vec<NotificationAgent>>, HubError> {
        retry_idempotent("poll_notifications", || async {
            let path = format!(
                "/api/v1/notifications/poll?timeout={}&batch_size={batch_size}",
                SERVER_POLL_WINDOW.as_secs()
            );
            let resp = self
                .request(reqwest::Method::GET, &path)
                .timeout(CLIENT_POLL_TIMEOUT)
                .send()
                .await?;

            if resp.status() == StatusCode::NOT_FOUND {
                debug!("hub_long_poll_404_falling_back_to_short_poll");
                return Ok(None);
            }
            if !resp.status().is_success() {
                return Err(HubError::Status(resp.status().as_u16()));
            }
            let envelope: AgentsEnvelope<NotificationAgent> = resp.json().await?;
            Ok(Some(envelope.agents))
        })
        .await
    }

    async fn list_notified_agents(&self) -> Result<Vec<NotificationAgent>, HubError> {
        retry_idempotent("list_notified_agents", || async {
            let resp = self
                .request(reqwest::Method::GET, "/api/v1/agents?has_notifications=true")
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(HubError::Status(resp.status().as_u16()));
            }
            let envelope: AgentsEnvelope<NotificationAgent> = resp.json().await?;
            Ok(envelope.agents)
        })
        .await
    }

    async fn list_stale_agents(&self, min_staleness: Duration) -> Result<Vec<StaleAgent>, HubError> {
        retry_idempotent("list_stale_agents", || async {
            let path = format!(
                "/api/v1/agents?stale=true&min_staleness={}",
                min_staleness.as_secs()
            );
            let resp = self.request(reqwest::Method::GET, &path).send().await?;
            if !resp.status().is_success() {
                return Err(HubError::Status(resp.status().as_u16()));
            }
            let envelope: AgentsEnvelope<StaleAgent> = resp.json().await?;
            Ok(envelope.agents)
        })
        .await
    }

    async fn mark_activated(&self, agent_id: &str) -> Result<(), HubError> {
        let path = format!("/api/v1/agents/{agent_id}/activated");
        let resp = self.request(reqwest::Method::POST, &path).send().await?;
        if !resp.status().is_success() {
            return Err(HubError::Status(resp.status().as_u16()));
        }
        Ok(())
    }

    async fn budget_health(&self, agent_id: &str) -> Result<BudgetHealth, HubError> {
        retry_idempotent("budget_health", || async {
            let path = format!("/api/v1/system/budget-health?agent_id={agent_id}");
            let resp = self.request(reqwest::Method::GET, &path).send().await?;
            if !resp.status().is_success() {
                return Err(HubError::Status(resp.status().as_u16()));
            }
            Ok(resp.json::<BudgetHealth>().await?)
        })
        .await
    }

    async fn report_consumption(&self, report: ConsumptionReport<'_>) -> Result<(), HubError> {
        let body = json!({
            "agent_id": report.agent_id,
            "tokens_input": report.tokens_input,
            "tokens_output": report.tokens_output,
            "cost_usd": report.cost_usd,
        });
        let resp = self
            .request(reqwest::Method::POST, "/api/v1/system/consumption")
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(HubError::Status(resp.status().as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn hub_against(server: &MockServer) -> HubClient {
        HubClient::new(server.uri(), None).expect("failed to build hub http client")
    }

    #[tokio::test]
    async fn poll_notifications_parses_agents() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/notifications/poll"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "agents": [{"id": "a1", "name": "Agent One", "notification_count": 3}]
            })))
            .mount(&server)
            .await;

        let hub = hub_against(&server).await;
        let agents = hub.poll_notifications(10).await.unwrap().unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].id, "a1");
    }

    #[tokio::test]
    async fn poll_notifications_404_returns_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/notifications/poll"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let hub = hub_against(&server).await;
        assert!(hub.poll_notifications(10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transient_5xx_is_retried_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/agents"))
            .and(query_param("has_notifications", "true"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/agents"))
            .and(query_param("has_notifications", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"agents": []})))
            .mount(&server)
            .await;

        let hub = hub_against(&server).await;
        let agents = hub.list_notified_agents().await.unwrap();
        assert!(agents.is_empty());
    }

    #[tokio::test]
    async fn budget_health_decodes_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/system/budget-health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "daily_limit": 10.0,
                "daily_used": 2.5,
                "monthly_limit": 200.0,
                "monthly_used": 40.0,
                "healthy": true
            })))
            .mount(&server)
            .await;

        let hub = hub_against(&server).await;
        let health = hub.budget_health("agent-1").await.unwrap();
        assert!(health.healthy);
        assert_eq!(health.daily_used, 2.5);
    }

    #[tokio::test]
    async fn report_consumption_posts_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/system/consumption"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let hub = hub_against(&server).await;
        let report = ConsumptionReport {
            agent_id: "agent-1",
            tokens_input: 100,
            tokens_output: 50,
            cost_usd: 0.01,
        };
        hub.report_consumption(report).await.unwrap();
    }
}
