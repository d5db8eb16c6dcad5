//! Topic names shared by the agents and the in-process broker.

pub const EVENT_STREAM: &str = "event-stream";
/// Breach notices raised during ingestion. Kept off `EVENT_STREAM` so the SLA
/// monitor only receives what it acts on.
pub const SLA_BREACH_NOTICES: &str = "sla.breach_detected";

pub const SLA_BREACH_ALERT: &str = "sla.breach_alert";
pub const SLA_WARNING_ALERT: &str = "sla.warning_alert";
pub const SLA_CRITICAL_ALERT: &str = "sla.critical_alert";
pub const SLA_ESCALATION_REQUIRED: &str = "sla.escalation_required";
pub const SLA_CHECK_REQUEST: &str = "sla.check_request";

pub const TICKET_CREATED: &str = "ticket.created";
pub const TICKET_UPDATED: &str = "ticket.updated";
pub const TICKET_ASSIGNED: &str = "ticket.assigned";

pub const SLA_ALERT_TOPICS: [&str; 4] =
    [SLA_BREACH_ALERT, SLA_WARNING_ALERT, SLA_CRITICAL_ALERT, SLA_ESCALATION_REQUIRED];

pub const WEBHOOK_EVENTS: &str = "webhook-events";
pub const POLLING_REQUESTS: &str = "polling-requests";
