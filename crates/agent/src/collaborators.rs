//! Capabilities the agents need from the outside world.
//!
//! The ticketing platform, policy store and escalation service are
//! consumed through these traits only. Wire clients live outside this
//! crate; the implementations here are the in-process defaults.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use slawatch_core::domain::message::Payload;
use slawatch_core::domain::sla::{AlertSeverity, CustomerImpact, SlaPolicySet};
use slawatch_core::domain::ticket::Ticket;
use slawatch_core::errors::CollaboratorError;
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Tickets,
    Tasks,
}

impl ResourceKind {
    pub const ALL: [Self; 2] = [Self::Tickets, Self::Tasks];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tickets => "tickets",
            Self::Tasks => "tasks",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tickets" => Some(Self::Tickets),
            "tasks" => Some(Self::Tasks),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One changed resource returned by a poll.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: String,
    pub event_type: String,
    pub data: Payload,
    pub changed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationRequest {
    pub ticket_id: String,
    pub reason: String,
    pub severity: AlertSeverity,
    pub customer_impact: CustomerImpact,
    pub breach_duration_minutes: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationOutcome {
    pub accepted: bool,
    pub reference: Option<String>,
}

/// Incremental change feed used by the poller.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn list_changes(
        &self,
        kind: ResourceKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<ResourceRecord>, CollaboratorError>;
}

#[async_trait]
pub trait TicketSource: Send + Sync {
    async fn get_active_tickets(&self) -> Result<Vec<Ticket>, CollaboratorError>;
    async fn get_ticket(&self, ticket_id: &str) -> Result<Option<Ticket>, CollaboratorError>;
}

#[async_trait]
pub trait PolicySource: Send + Sync {
    async fn load_policies(&self) -> Result<SlaPolicySet, CollaboratorError>;
}

#[async_trait]
pub trait EscalationService: Send + Sync {
    async fn escalate(
        &self,
        request: EscalationRequest,
    ) -> Result<EscalationOutcome, CollaboratorError>;
}

#[derive(Default)]
pub struct NoopChangeFeed;

#[async_trait]
impl ChangeFeed for NoopChangeFeed {
    async fn list_changes(
        &self,
        _kind: ResourceKind,
        _since: DateTime<Utc>,
    ) -> Result<Vec<ResourceRecord>, CollaboratorError> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
pub struct NoopTicketSource;

#[async_trait]
impl TicketSource for NoopTicketSource {
    async fn get_active_tickets(&self) -> Result<Vec<Ticket>, CollaboratorError> {
        Ok(Vec::new())
    }

    async fn get_ticket(&self, _ticket_id: &str) -> Result<Option<Ticket>, CollaboratorError> {
        Ok(None)
    }
}

/// Serves a fixed policy set, the standard one unless told otherwise.
pub struct StaticPolicySource {
    policies: SlaPolicySet,
}

impl StaticPolicySource {
    pub fn new(policies: SlaPolicySet) -> Self {
        Self { policies }
    }
}

impl Default for StaticPolicySource {
    fn default() -> Self {
        Self::new(SlaPolicySet::standard())
    }
}

#[async_trait]
impl PolicySource for StaticPolicySource {
    async fn load_policies(&self) -> Result<SlaPolicySet, CollaboratorError> {
        Ok(self.policies.clone())
    }
}

/// Accepts every escalation and records it in the log.
#[derive(Default)]
pub struct LoggingEscalationService;

#[async_trait]
impl EscalationService for LoggingEscalationService {
    async fn escalate(
        &self,
        request: EscalationRequest,
    ) -> Result<EscalationOutcome, CollaboratorError> {
        info!(
            event_name = "integration.escalation.logged",
            ticket_id = %request.ticket_id,
            severity = request.severity.as_str(),
            reason = %request.reason,
            breach_duration_minutes = request.breach_duration_minutes,
            "escalation recorded"
        );
        Ok(EscalationOutcome { accepted: true, reference: None })
    }
}
