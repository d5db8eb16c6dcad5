use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::message::{clamp_priority, Payload, DEFAULT_PRIORITY};

pub const TICKET_CREATED: &str = "ticket_created";
pub const TICKET_STATUS_CHANGED: &str = "ticket_status_changed";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Webhook,
    Poll,
    Message,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Poll => "poll",
            Self::Message => "message",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub source: EventSource,
    pub data: Payload,
    pub processed: bool,
    pub priority: u8,
}

impl Event {
    pub fn new(
        id: impl Into<String>,
        event_type: impl Into<String>,
        source: EventSource,
        data: Payload,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now(),
            event_type: event_type.into(),
            source,
            data,
            processed: false,
            priority: DEFAULT_PRIORITY,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = clamp_priority(priority);
        self
    }

    /// Normalises a raw push payload. The event id and type come from the
    /// `id` and `event_type` fields when present.
    pub fn from_raw(raw: Payload, source: EventSource) -> Self {
        let id = raw
            .get("id")
            .and_then(value_as_id)
            .unwrap_or_else(|| format!("{}_{}", source.as_str(), Uuid::new_v4()));
        let event_type =
            raw.get("event_type").and_then(Value::as_str).unwrap_or("unknown").to_string();
        let priority = classify_priority(&event_type);

        Self::new(id, event_type, source, raw).with_priority(priority)
    }

    pub fn is_ticket_event(&self) -> bool {
        self.event_type.starts_with("ticket_")
    }

    pub fn affects_sla(&self) -> bool {
        self.event_type == TICKET_CREATED || self.event_type == TICKET_STATUS_CHANGED
    }

    pub fn ticket_id(&self) -> Option<&str> {
        self.data.get("ticket_id").and_then(Value::as_str)
    }
}

/// Priority heuristic for push events: SLA/critical/urgent signals first,
/// lifecycle changes next, everything else at the default.
pub fn classify_priority(event_type: &str) -> u8 {
    const URGENT: [&str; 3] = ["sla_breach", "critical", "urgent"];
    const LIFECYCLE: [&str; 2] = ["ticket_created", "status_changed"];

    if URGENT.iter().any(|keyword| event_type.contains(keyword)) {
        1
    } else if LIFECYCLE.iter().any(|keyword| event_type.contains(keyword)) {
        3
    } else {
        DEFAULT_PRIORITY
    }
}

fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if !id.trim().is_empty() => Some(id.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{classify_priority, Event, EventSource};
    use crate::domain::message::payload_from;

    #[test]
    fn raw_payload_supplies_id_type_and_priority() {
        let raw = payload_from(&json!({
            "id": "evt-1",
            "event_type": "ticket_created",
            "ticket_id": "T1"
        }));

        let event = Event::from_raw(raw, EventSource::Webhook);

        assert_eq!(event.id, "evt-1");
        assert_eq!(event.event_type, "ticket_created");
        assert_eq!(event.priority, 3);
        assert_eq!(event.ticket_id(), Some("T1"));
        assert!(event.is_ticket_event());
        assert!(event.affects_sla());
        assert!(!event.processed);
    }

    #[test]
    fn missing_id_is_generated_with_source_prefix() {
        let event = Event::from_raw(payload_from(&json!({})), EventSource::Webhook);

        assert!(event.id.starts_with("webhook_"));
        assert_eq!(event.event_type, "unknown");
        assert_eq!(event.priority, 5);
    }

    #[test]
    fn numeric_ids_are_accepted() {
        let event = Event::from_raw(payload_from(&json!({ "id": 42 })), EventSource::Message);
        assert_eq!(event.id, "42");
    }

    #[test]
    fn priority_heuristic_orders_urgent_before_lifecycle() {
        assert_eq!(classify_priority("sla_breach_detected"), 1);
        assert_eq!(classify_priority("urgent_page"), 1);
        assert_eq!(classify_priority("ticket_status_changed"), 3);
        assert_eq!(classify_priority("task_completed"), 5);
    }
}
