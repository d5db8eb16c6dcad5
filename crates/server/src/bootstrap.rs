use std::sync::Arc;

use slawatch_agent::collaborators::{LoggingEscalationService, NoopChangeFeed, StaticPolicySource};
use slawatch_agent::{
    AgentError, EventIngestionAgent, IngestionSettings, LocalBroker, RuntimeSettings,
    SlaMonitorAgent, SlaMonitorSettings, Subagent, SubagentRuntime,
};
use slawatch_core::config::{AppConfig, ConfigError};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub broker: Arc<LocalBroker>,
    pub ingestion: Arc<SubagentRuntime<EventIngestionAgent>>,
    pub sla_monitor: Arc<SubagentRuntime<SlaMonitorAgent>>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("agent `{agent}` failed to start: {source}")]
    AgentStart {
        agent: String,
        #[source]
        source: AgentError,
    },
}

/// Builds both agents around a shared in-process broker and starts them.
///
/// The SLA monitor reads tickets from the ingestion agent's cache, so a
/// standalone process needs no external ticket source.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        partitions = config.ingestion.partitions,
        polling_interval_secs = config.ingestion.polling_interval_secs,
        sla_check_interval_secs = config.sla.check_interval_secs,
        "starting application bootstrap"
    );

    let broker = Arc::new(LocalBroker::new());
    let policies = Arc::new(StaticPolicySource::default());
    let runtime_settings = RuntimeSettings::from_config(&config);

    let ingestion_agent = EventIngestionAgent::new(
        IngestionSettings::from_config(&config),
        Arc::new(NoopChangeFeed),
        policies.clone(),
    );
    let tickets = Arc::new(ingestion_agent.ticket_view());
    let ingestion =
        Arc::new(SubagentRuntime::new(ingestion_agent, runtime_settings.clone(), broker.clone()));

    let monitor_agent = SlaMonitorAgent::new(
        SlaMonitorSettings::from_config(&config),
        tickets,
        policies,
        Arc::new(LoggingEscalationService),
    );
    let sla_monitor =
        Arc::new(SubagentRuntime::new(monitor_agent, runtime_settings, broker.clone()));

    // The monitor is routed before ingestion starts publishing.
    start(&broker, &sla_monitor).await?;
    start(&broker, &ingestion).await?;

    info!(
        event_name = "system.bootstrap.agents_started",
        correlation_id = "bootstrap",
        agents = 2,
        "subagents started and routed"
    );

    Ok(Application { config, broker, ingestion, sla_monitor })
}

async fn start<A: Subagent>(
    broker: &LocalBroker,
    runtime: &SubagentRuntime<A>,
) -> Result<(), BootstrapError> {
    runtime
        .start()
        .await
        .map_err(|source| BootstrapError::AgentStart {
            agent: runtime.name().to_string(),
            source,
        })?;
    broker.attach(runtime);
    Ok(())
}

impl Application {
    /// Stops ingestion first so nothing new reaches the monitor while it drains.
    pub async fn shutdown(&self) {
        self.ingestion.stop().await;
        self.sla_monitor.stop().await;
        info!(
            event_name = "system.bootstrap.agents_stopped",
            correlation_id = "shutdown",
            "subagents stopped"
        );
    }
}
