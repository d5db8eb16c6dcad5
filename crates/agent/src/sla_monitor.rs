use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use slawatch_core::config::AppConfig;
use slawatch_core::domain::message::{payload_from, AgentMessage, Payload, HIGHEST_PRIORITY};
use slawatch_core::domain::sla::{AlertSeverity, AlertType, SlaAlert, SlaPolicySet};
use slawatch_core::domain::ticket::Ticket;
use slawatch_core::sla::{self, AlertCache, SlaThresholds};
use slawatch_core::topics;
use tracing::{debug, info, warn};

use crate::collaborators::{EscalationRequest, EscalationService, PolicySource, TicketSource};
use crate::error::AgentError;
use crate::runtime::{AgentContext, PeriodicTask, Subagent};

pub const AGENT_NAME: &str = "sla_monitor";

const SWEEP_TASK: &str = "sla_sweep";

pub const SLA_ALERT: &str = "sla_alert";
pub const ESCALATION_REQUIRED: &str = "escalation_required";

const ALERT_PRIORITY: u8 = 3;

#[derive(Clone, Debug)]
pub struct SlaMonitorSettings {
    pub check_interval: Duration,
    pub thresholds: SlaThresholds,
    pub alert_cooldown: Duration,
}

impl Default for SlaMonitorSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl SlaMonitorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            check_interval: config.sla.check_interval(),
            thresholds: config.sla.thresholds(),
            alert_cooldown: config.sla.alert_cooldown(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SlaMetrics {
    pub active_alerts: usize,
    pub breach_count: u64,
    pub alerts_sent: u64,
    pub escalations_triggered: u64,
    pub sweeps_completed: u64,
    pub sla_policies_loaded: usize,
    pub monitoring_interval_seconds: u64,
}

#[derive(Debug, Default)]
struct Counters {
    breaches: AtomicU64,
    alerts_sent: AtomicU64,
    escalations: AtomicU64,
    sweeps: AtomicU64,
}

/// Mailbox commands, routed by topic first and message type second.
#[derive(Clone, Debug, PartialEq)]
enum SlaCommand {
    Check(Ticket),
    Reassigned(Ticket),
    Lookup(String),
    CheckAll,
    Escalate { ticket_id: String, reason: String },
    Ignore(&'static str),
}

impl SlaCommand {
    fn parse(message: &AgentMessage) -> Result<Self, AgentError> {
        match message.target_topic.as_str() {
            topics::TICKET_CREATED | topics::TICKET_UPDATED => {
                return Ok(ticket_payload(message)?
                    .map_or(Self::Ignore("ticket message without ticket"), Self::Check));
            }
            topics::TICKET_ASSIGNED => {
                return Ok(ticket_payload(message)?
                    .map_or(Self::Ignore("assignment without ticket"), Self::Reassigned));
            }
            topics::SLA_CHECK_REQUEST => return Ok(lookup(message.payload_str("ticket_id"))),
            topics::SLA_BREACH_NOTICES => return Ok(breach_lookup(message)),
            _ => {}
        }

        match message.message_type.as_str() {
            "ticket_event" => Ok(ticket_payload(message)?
                .map_or(Self::Ignore("ticket event without ticket"), Self::Check)),
            "sla_check" => match message.payload_str("request_type").unwrap_or("single_ticket") {
                "all_tickets" => Ok(Self::CheckAll),
                "single_ticket" => Ok(lookup(message.payload_str("ticket_id"))),
                other => Err(AgentError::InvalidMessage(format!(
                    "unknown sla_check request_type `{other}`"
                ))),
            },
            "escalation_request" => Ok(match message.payload_str("ticket_id") {
                Some(ticket_id) => Self::Escalate {
                    ticket_id: ticket_id.to_string(),
                    reason: message
                        .payload_str("reason")
                        .unwrap_or("Manual escalation")
                        .to_string(),
                },
                None => Self::Ignore("escalation request without ticket_id"),
            }),
            crate::ingestion::SLA_BREACH_DETECTED => Ok(breach_lookup(message)),
            _ => Ok(Self::Ignore("unhandled message type")),
        }
    }
}

fn lookup(ticket_id: Option<&str>) -> SlaCommand {
    ticket_id.map_or(SlaCommand::Ignore("check request without ticket_id"), |id| {
        SlaCommand::Lookup(id.to_string())
    })
}

fn breach_lookup(message: &AgentMessage) -> SlaCommand {
    lookup(
        message
            .payload_object("sla_breach")
            .and_then(|breach| breach.get("ticket_id"))
            .and_then(Value::as_str),
    )
}

fn ticket_payload(message: &AgentMessage) -> Result<Option<Ticket>, AgentError> {
    message
        .payload
        .get("ticket")
        .map(|ticket| {
            serde_json::from_value(ticket.clone()).map_err(|error| {
                AgentError::InvalidMessage(format!("malformed ticket payload: {error}"))
            })
        })
        .transpose()
}

/// Sweeps active tickets against their SLA policies, raises alerts with a
/// per-ticket cooldown and escalates breaches and critical findings.
pub struct SlaMonitorAgent {
    settings: SlaMonitorSettings,
    tickets: Arc<dyn TicketSource>,
    policy_source: Arc<dyn PolicySource>,
    escalations: Arc<dyn EscalationService>,
    policies: RwLock<SlaPolicySet>,
    alerts: Mutex<AlertCache>,
    counters: Counters,
}

impl SlaMonitorAgent {
    pub fn new(
        settings: SlaMonitorSettings,
        tickets: Arc<dyn TicketSource>,
        policy_source: Arc<dyn PolicySource>,
        escalations: Arc<dyn EscalationService>,
    ) -> Self {
        let alerts = Mutex::new(AlertCache::new(settings.alert_cooldown));
        Self {
            settings,
            tickets,
            policy_source,
            escalations,
            policies: RwLock::new(SlaPolicySet::default()),
            alerts,
            counters: Counters::default(),
        }
    }

    fn alerts(&self) -> MutexGuard<'_, AlertCache> {
        self.alerts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current_alerts(&self) -> Vec<SlaAlert> {
        self.alerts().alerts()
    }

    pub fn sla_metrics(&self) -> SlaMetrics {
        SlaMetrics {
            active_alerts: self.alerts().len(),
            breach_count: self.counters.breaches.load(Ordering::Relaxed),
            alerts_sent: self.counters.alerts_sent.load(Ordering::Relaxed),
            escalations_triggered: self.counters.escalations.load(Ordering::Relaxed),
            sweeps_completed: self.counters.sweeps.load(Ordering::Relaxed),
            sla_policies_loaded: self.policies.read().unwrap_or_else(PoisonError::into_inner).len(),
            monitoring_interval_seconds: self.settings.check_interval.as_secs(),
        }
    }

    /// Immediate check of one ticket, or a full sweep when `ticket_id` is
    /// `None`. Returns the number of alerts emitted.
    pub async fn force_check(
        &self,
        ctx: &AgentContext,
        ticket_id: Option<&str>,
    ) -> Result<usize, AgentError> {
        match ticket_id {
            Some(ticket_id) => self.check_by_id(ticket_id, ctx).await.map(usize::from),
            None => self.sweep(ctx).await,
        }
    }

    /// One pass over every active ticket.
    pub async fn sweep(&self, ctx: &AgentContext) -> Result<usize, AgentError> {
        let source = self.tickets.clone();
        let tickets = ctx.call_remote(|| async move { source.get_active_tickets().await }).await?;

        let mut emitted = 0;
        for ticket in &tickets {
            if self.check_ticket(ticket, ctx).await.is_some() {
                emitted += 1;
            }
        }

        self.counters.sweeps.fetch_add(1, Ordering::Relaxed);
        info!(
            event_name = "sla.sweep.completed",
            tickets_checked = tickets.len(),
            alerts_emitted = emitted,
            "SLA sweep completed"
        );
        Ok(emitted)
    }

    async fn check_by_id(&self, ticket_id: &str, ctx: &AgentContext) -> Result<bool, AgentError> {
        let source = self.tickets.clone();
        let id = ticket_id.to_string();
        let ticket = ctx.call_remote(|| async move { source.get_ticket(&id).await }).await?;
        match ticket {
            Some(ticket) => Ok(self.check_ticket(&ticket, ctx).await.is_some()),
            None => {
                debug!(
                    event_name = "sla.ticket.not_found",
                    ticket_id = %ticket_id,
                    "ticket not found for SLA check"
                );
                Ok(false)
            }
        }
    }

    /// Evaluates one ticket and emits its alert unless the ticket is still in
    /// cooldown.
    pub async fn check_ticket(&self, ticket: &Ticket, ctx: &AgentContext) -> Option<SlaAlert> {
        let now = Utc::now();
        if ticket.status.is_terminal() {
            self.alerts().clear(&ticket.id);
            return None;
        }

        let alert = {
            let policies = self.policies.read().unwrap_or_else(PoisonError::into_inner);
            let Some(policy) = policies.get(ticket.priority) else {
                debug!(
                    event_name = "sla.policy.missing",
                    ticket_id = %ticket.id,
                    priority = ticket.priority.as_str(),
                    "no SLA policy for ticket priority"
                );
                return None;
            };

            let mut alerts = self.alerts();
            if alerts.in_cooldown(&ticket.id, now) {
                debug!(
                    event_name = "sla.alert.suppressed",
                    ticket_id = %ticket.id,
                    "alert suppressed by cooldown"
                );
                return None;
            }
            let alert = sla::evaluate(ticket, policy, &self.settings.thresholds, now)?;
            alerts.record(alert.clone());
            alert
        };

        if alert.alert_type == AlertType::Breach {
            self.counters.breaches.fetch_add(1, Ordering::Relaxed);
        }
        self.send_alert(&alert, ctx).await;
        Some(alert)
    }

    async fn send_alert(&self, alert: &SlaAlert, ctx: &AgentContext) {
        let Some(topic) = alert.alert_type.topic() else {
            return;
        };

        let mut payload = Payload::new();
        payload.insert("alert".to_string(), Value::Object(payload_from(alert)));
        payload.insert("recommended_actions".to_string(), json!(alert.recommended_actions));
        let priority = if alert.severity == AlertSeverity::Critical {
            HIGHEST_PRIORITY
        } else {
            ALERT_PRIORITY
        };
        let message = ctx
            .message(topic, SLA_ALERT, payload)
            .with_id(format!("sla_alert_{}_{}", alert.ticket_id, alert.timestamp.timestamp()))
            .with_priority(priority);

        info!(
            event_name = "sla.alert.emitted",
            ticket_id = %alert.ticket_id,
            alert_type = alert.alert_type.as_str(),
            severity = alert.severity.as_str(),
            time_remaining_minutes = alert.time_remaining_minutes,
            topic,
            "SLA alert emitted"
        );
        ctx.publish(message).await;
        self.counters.alerts_sent.fetch_add(1, Ordering::Relaxed);

        if alert.escalation_required {
            self.escalate(alert, format!("SLA {}", alert.alert_type.as_str()), ctx).await;
        }
    }

    /// Publishes `escalation_required` and forwards the request to the
    /// escalation service. Service failures are logged, never raised.
    async fn escalate(&self, alert: &SlaAlert, reason: String, ctx: &AgentContext) {
        let request = EscalationRequest {
            ticket_id: alert.ticket_id.clone(),
            reason,
            severity: alert.severity,
            customer_impact: alert.customer_impact,
            breach_duration_minutes: alert.breach_duration_minutes,
        };

        let mut payload = payload_from(&request);
        payload.insert("alert".to_string(), Value::Object(payload_from(alert)));
        let message = ctx
            .message(topics::SLA_ESCALATION_REQUIRED, ESCALATION_REQUIRED, payload)
            .with_id(format!("escalation_{}_{}", alert.ticket_id, alert.timestamp.timestamp()))
            .with_priority(HIGHEST_PRIORITY);
        ctx.publish(message).await;

        let service = self.escalations.clone();
        match ctx.call_remote(|| async move { service.escalate(request).await }).await {
            Ok(outcome) if outcome.accepted => {
                self.counters.escalations.fetch_add(1, Ordering::Relaxed);
                info!(
                    event_name = "sla.escalation.triggered",
                    ticket_id = %alert.ticket_id,
                    reference = outcome.reference.as_deref().unwrap_or("none"),
                    "escalation triggered"
                );
            }
            Ok(_) => warn!(
                event_name = "sla.escalation.declined",
                ticket_id = %alert.ticket_id,
                "escalation service declined request"
            ),
            Err(error) => warn!(
                event_name = "sla.escalation.failed",
                ticket_id = %alert.ticket_id,
                error = %error,
                "escalation service call failed"
            ),
        }
    }
}

#[async_trait]
impl Subagent for SlaMonitorAgent {
    fn name(&self) -> &str {
        AGENT_NAME
    }

    async fn initialize(&self, ctx: &AgentContext) -> Result<(), AgentError> {
        let source = self.policy_source.clone();
        let policies = ctx
            .call_remote(|| async move { source.load_policies().await })
            .await
            .map_err(|error| AgentError::Startup(format!("could not load SLA policies: {error}")))?;
        let loaded = policies.len();
        *self.policies.write().unwrap_or_else(PoisonError::into_inner) = policies;

        for topic in [
            topics::TICKET_CREATED,
            topics::TICKET_UPDATED,
            topics::TICKET_ASSIGNED,
            topics::SLA_CHECK_REQUEST,
            topics::SLA_BREACH_NOTICES,
        ] {
            ctx.subscribe(topic);
        }
        for topic in topics::SLA_ALERT_TOPICS {
            ctx.register_publication(topic);
        }

        info!(
            event_name = "sla.agent.initialized",
            sla_policies_loaded = loaded,
            check_interval_secs = self.settings.check_interval.as_secs(),
            "SLA monitor initialized"
        );
        Ok(())
    }

    async fn process_message(
        &self,
        message: &AgentMessage,
        ctx: &AgentContext,
    ) -> Result<Option<AgentMessage>, AgentError> {
        match SlaCommand::parse(message)? {
            SlaCommand::Check(ticket) => {
                self.check_ticket(&ticket, ctx).await;
            }
            SlaCommand::Reassigned(ticket) => {
                self.alerts().clear(&ticket.id);
                self.check_ticket(&ticket, ctx).await;
            }
            SlaCommand::Lookup(ticket_id) => {
                self.check_by_id(&ticket_id, ctx).await?;
            }
            SlaCommand::CheckAll => {
                self.sweep(ctx).await?;
            }
            SlaCommand::Escalate { ticket_id, reason } => {
                info!(
                    event_name = "sla.escalation.requested",
                    ticket_id = %ticket_id,
                    "manual escalation requested"
                );
                let alert = sla::manual_escalation(ticket_id, Utc::now());
                self.escalate(&alert, reason, ctx).await;
            }
            SlaCommand::Ignore(reason) => {
                debug!(
                    event_name = "sla.message.ignored",
                    message_id = %message.id,
                    topic = %message.target_topic,
                    message_type = %message.message_type,
                    reason,
                    "message ignored"
                );
            }
        }
        Ok(None)
    }

    fn periodic_tasks(&self) -> Vec<PeriodicTask> {
        vec![PeriodicTask::new(SWEEP_TASK, self.settings.check_interval)]
    }

    async fn on_tick(&self, task: &str, ctx: &AgentContext) -> Result<(), AgentError> {
        if task == SWEEP_TASK {
            self.sweep(ctx).await?;
        }
        Ok(())
    }
}
