use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub const HIGHEST_PRIORITY: u8 = 1;
pub const LOWEST_PRIORITY: u8 = 10;
pub const DEFAULT_PRIORITY: u8 = 5;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

pub type Payload = Map<String, Value>;

/// Envelope exchanged between subagents over named topics.
///
/// `retry_count` never exceeds `max_retries`; once the budget is spent the
/// runtime drops the message instead of requeueing it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub source_agent: String,
    pub target_topic: String,
    pub message_type: String,
    pub payload: Payload,
    /// Always within `HIGHEST_PRIORITY..=LOWEST_PRIORITY`; set through
    /// [`AgentMessage::with_priority`].
    #[serde(deserialize_with = "deserialize_priority")]
    priority: u8,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl AgentMessage {
    pub fn new(
        source_agent: impl Into<String>,
        target_topic: impl Into<String>,
        message_type: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            source_agent: source_agent.into(),
            target_topic: target_topic.into(),
            message_type: message_type.into(),
            payload,
            priority: DEFAULT_PRIORITY,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = clamp_priority(priority);
        self
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self.retry_count = self.retry_count.min(max_retries);
        self
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Consumes one unit of retry budget. Returns `false` when the budget is
    /// already exhausted, leaving the counter untouched.
    pub fn record_retry(&mut self) -> bool {
        if !self.can_retry() {
            return false;
        }
        self.retry_count += 1;
        true
    }

    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn payload_object(&self, key: &str) -> Option<&Payload> {
        self.payload.get(key).and_then(Value::as_object)
    }
}

pub fn clamp_priority(priority: u8) -> u8 {
    priority.clamp(HIGHEST_PRIORITY, LOWEST_PRIORITY)
}

fn deserialize_priority<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    u8::deserialize(deserializer).map(clamp_priority)
}

/// Builds a payload map from a serializable value, falling back to an empty
/// map when the value does not serialize to a JSON object.
pub fn payload_from<T: Serialize>(value: &T) -> Payload {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Payload::new(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{payload_from, AgentMessage, Payload};

    #[test]
    fn retry_budget_is_never_exceeded() {
        let mut message =
            AgentMessage::new("tester", "topic", "noop", Payload::new()).with_max_retries(2);

        assert!(message.record_retry());
        assert!(message.record_retry());
        assert!(!message.record_retry());
        assert_eq!(message.retry_count, 2);
    }

    #[test]
    fn priority_is_clamped_into_range() {
        let urgent = AgentMessage::new("a", "t", "m", Payload::new()).with_priority(0);
        let idle = AgentMessage::new("a", "t", "m", Payload::new()).with_priority(42);

        assert_eq!(urgent.priority(), 1);
        assert_eq!(idle.priority(), 10);
    }

    #[test]
    fn deserialized_priority_is_clamped_too() {
        let mut raw = serde_json::to_value(AgentMessage::new("a", "t", "m", Payload::new()))
            .expect("serialize");
        raw["priority"] = json!(0);
        let message: AgentMessage = serde_json::from_value(raw).expect("deserialize");

        assert_eq!(message.priority(), 1);
    }

    #[test]
    fn payload_accessors_read_nested_values() {
        let payload = payload_from(&json!({ "ticket_id": "T-1", "ticket": { "id": "T-1" } }));
        let message = AgentMessage::new("a", "t", "m", payload);

        assert_eq!(message.payload_str("ticket_id"), Some("T-1"));
        assert!(message.payload_object("ticket").is_some());
        assert_eq!(message.payload_str("missing"), None);
    }

    #[test]
    fn non_object_values_produce_empty_payloads() {
        assert!(payload_from(&json!([1, 2, 3])).is_empty());
    }
}
