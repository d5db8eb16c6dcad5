//! Operational HTTP surface.
//!
//! Endpoints:
//! - `GET  /health`         - per-agent health, 503 when any agent is unhealthy
//! - `GET  /metrics`        - runtime metrics plus ingestion and SLA status
//! - `GET  /alerts`         - SLA alerts currently held by the monitor
//! - `POST /webhook/events` - inbound ticketing events (see `webhook`)

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use secrecy::SecretString;
use serde::Serialize;
use slawatch_agent::{
    AgentHealth, AgentStatus, EventIngestionAgent, IngestionStatus, SlaMetrics, SlaMonitorAgent,
    SubagentRuntime,
};
use slawatch_core::domain::sla::SlaAlert;
use slawatch_core::errors::InterfaceError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::bootstrap::Application;
use crate::webhook;

#[derive(Clone)]
pub struct HttpState {
    pub(crate) ingestion: Arc<SubagentRuntime<EventIngestionAgent>>,
    pub(crate) sla_monitor: Arc<SubagentRuntime<SlaMonitorAgent>>,
    pub(crate) webhook_secret: Option<SecretString>,
}

impl HttpState {
    pub fn from_app(app: &Application) -> Self {
        Self {
            ingestion: app.ingestion.clone(),
            sla_monitor: app.sla_monitor.clone(),
            webhook_secret: app.config.server.webhook_secret.clone(),
        }
    }

    fn agent_health(&self) -> Vec<AgentHealth> {
        vec![self.ingestion.health(), self.sla_monitor.health()]
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub agents: Vec<AgentHealth>,
    pub checked_at: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetricsResponse {
    pub agents: Vec<AgentStatus>,
    pub ingestion: IngestionStatus,
    pub sla: SlaMetrics,
    pub collected_at: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlertsResponse {
    pub count: usize,
    pub alerts: Vec<SlaAlert>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub detail: String,
    pub correlation_id: String,
}

pub type ApiRejection = (StatusCode, Json<ApiError>);

pub(crate) fn reject(error: InterfaceError) -> ApiRejection {
    let status = match error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ApiError {
            error: error.user_message().to_string(),
            detail: error.to_string(),
            correlation_id: error.correlation_id().to_string(),
        }),
    )
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/alerts", get(alerts))
        .route("/webhook/events", post(webhook::receive_event))
        .with_state(state)
}

pub struct HttpServer {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HttpServer {
    /// Stops accepting connections and waits for in-flight requests.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

pub async fn spawn(bind_address: &str, port: u16, state: HttpState) -> std::io::Result<HttpServer> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;
    let (shutdown, mut signal) = watch::channel(false);

    info!(
        event_name = "system.http.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "http endpoint started"
    );

    let task = tokio::spawn(async move {
        let graceful = async move {
            let _ = signal.wait_for(|stopped| *stopped).await;
        };
        if let Err(error) =
            axum::serve(listener, router(state)).with_graceful_shutdown(graceful).await
        {
            error!(
                event_name = "system.http.error",
                correlation_id = "bootstrap",
                error = %error,
                "http endpoint terminated unexpectedly"
            );
        }
    });

    Ok(HttpServer { shutdown, task })
}

pub async fn health(State(state): State<HttpState>) -> (StatusCode, Json<HealthResponse>) {
    let agents = state.agent_health();
    let healthy = agents.iter().all(AgentHealth::is_healthy);

    let payload = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" },
        agents,
        checked_at: Utc::now().to_rfc3339(),
    };
    let status_code = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

pub async fn metrics(State(state): State<HttpState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        agents: vec![state.ingestion.status(), state.sla_monitor.status()],
        ingestion: state.ingestion.agent().monitoring_status(),
        sla: state.sla_monitor.agent().sla_metrics(),
        collected_at: Utc::now().to_rfc3339(),
    })
}

pub async fn alerts(State(state): State<HttpState>) -> Json<AlertsResponse> {
    let alerts = state.sla_monitor.agent().current_alerts();
    Json(AlertsResponse { count: alerts.len(), alerts })
}

#[cfg(test)]
pub(crate) mod tests {
    use axum::{
        body::Body,
        extract::State,
        http::{Request, StatusCode},
    };
    use slawatch_core::config::{AppConfig, ConfigOverrides, LoadOptions};
    use tower::ServiceExt;

    use super::{alerts, health, metrics, router, HttpState};
    use crate::bootstrap::{bootstrap_with_config, Application};

    pub(crate) async fn app(webhook_secret: Option<&str>) -> Application {
        let mut config = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                partitions: Some(2),
                webhook_secret: webhook_secret.map(str::to_string),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .expect("config");
        config.ingestion.processing_interval_ms = 20;
        bootstrap_with_config(config).await.expect("bootstrap")
    }

    #[tokio::test]
    async fn health_is_ok_while_both_agents_run() {
        let app = app(None).await;

        let (status, axum::Json(payload)) = health(State(HttpState::from_app(&app))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "healthy");
        assert_eq!(payload.agents.len(), 2);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn health_reports_unavailable_once_an_agent_stops() {
        let app = app(None).await;
        app.sla_monitor.stop().await;

        let (status, axum::Json(payload)) = health(State(HttpState::from_app(&app))).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        app.shutdown().await;
    }

    #[tokio::test]
    async fn metrics_and_alerts_start_empty() {
        let app = app(None).await;
        let state = HttpState::from_app(&app);

        let axum::Json(snapshot) = metrics(State(state.clone())).await;
        assert_eq!(snapshot.agents.len(), 2);
        assert_eq!(snapshot.ingestion.monitored_tickets, 0);
        assert_eq!(snapshot.sla.sla_policies_loaded, 4);

        let axum::Json(current) = alerts(State(state)).await;
        assert_eq!(current.count, 0);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn router_serves_health_over_http() {
        let app = app(None).await;

        let response = router(HttpState::from_app(&app))
            .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        app.shutdown().await;
    }
}
