use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use slawatch_core::domain::message::AgentMessage;
use tracing::{debug, info, warn};

use crate::error::AgentError;
use crate::runtime::{Mailbox, Subagent, SubagentRuntime};

/// Where agents publish. Publishing must not block on subscribers.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn publish(&self, message: AgentMessage) -> Result<(), AgentError>;
}

/// Records publications in the log and nothing else.
#[derive(Default)]
pub struct TracingSink;

#[async_trait]
impl MessageSink for TracingSink {
    async fn publish(&self, message: AgentMessage) -> Result<(), AgentError> {
        log_publication(&message);
        Ok(())
    }
}

/// In-process topic broker. Delivery goes straight into subscriber
/// mailboxes; a full mailbox loses that copy of the message.
#[derive(Default)]
pub struct LocalBroker {
    routes: RwLock<HashMap<String, Vec<Mailbox>>>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, topic: impl Into<String>, mailbox: Mailbox) {
        let topic = topic.into();
        debug!(
            event_name = "agent.broker.route_added",
            topic = %topic,
            agent = mailbox.agent(),
            "broker route added"
        );
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic)
            .or_default()
            .push(mailbox);
    }

    /// Routes every topic the runtime's agent subscribed to into its
    /// mailbox. Subscriptions are registered during `start`, so attach a
    /// runtime after starting it.
    pub fn attach<A: Subagent>(&self, runtime: &SubagentRuntime<A>) {
        for topic in runtime.context().subscriptions() {
            self.route(topic, runtime.mailbox());
        }
    }

    pub fn subscribers(&self, topic: &str) -> Vec<String> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map(|mailboxes| mailboxes.iter().map(|mailbox| mailbox.agent().to_string()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageSink for LocalBroker {
    async fn publish(&self, message: AgentMessage) -> Result<(), AgentError> {
        log_publication(&message);

        let mailboxes = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&message.target_topic)
            .cloned();
        let Some(mailboxes) = mailboxes else {
            debug!(
                event_name = "agent.broker.unrouted",
                topic = %message.target_topic,
                message_id = %message.id,
                "no subscribers for topic"
            );
            return Ok(());
        };

        for mailbox in mailboxes {
            if let Err(error) = mailbox.deliver(message.clone()) {
                warn!(
                    event_name = "agent.broker.delivery_failed",
                    topic = %message.target_topic,
                    message_id = %message.id,
                    agent = mailbox.agent(),
                    error = %error,
                    "failed to deliver message to subscriber"
                );
            }
        }
        Ok(())
    }
}

/// Keeps every published message in memory, for embedding and tests.
#[derive(Default)]
pub struct MemorySink {
    messages: Mutex<Vec<AgentMessage>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<AgentMessage> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn on_topic(&self, topic: &str) -> Vec<AgentMessage> {
        self.messages().into_iter().filter(|message| message.target_topic == topic).collect()
    }

    pub fn of_type(&self, message_type: &str) -> Vec<AgentMessage> {
        self.messages().into_iter().filter(|message| message.message_type == message_type).collect()
    }

    pub fn clear(&self) {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn publish(&self, message: AgentMessage) -> Result<(), AgentError> {
        log_publication(&message);
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).push(message);
        Ok(())
    }
}

fn log_publication(message: &AgentMessage) {
    info!(
        event_name = "agent.message.published",
        source_agent = %message.source_agent,
        topic = %message.target_topic,
        message_type = %message.message_type,
        message_id = %message.id,
        priority = message.priority(),
        "message published"
    );
    debug!(
        event_name = "agent.message.payload",
        message_id = %message.id,
        payload = %serde_json::Value::Object(message.payload.clone()),
        "published payload"
    );
}

#[cfg(test)]
mod tests {
    use serde_json::Map;
    use slawatch_core::domain::message::AgentMessage;

    use super::{LocalBroker, MemorySink, MessageSink};
    use crate::runtime::Mailbox;

    fn message(topic: &str) -> AgentMessage {
        AgentMessage::new("tester", topic, "ping", Map::new())
    }

    #[tokio::test]
    async fn memory_sink_filters_by_topic_and_type() {
        let sink = MemorySink::new();
        sink.publish(message("a")).await.expect("publish");
        sink.publish(message("b")).await.expect("publish");

        assert_eq!(sink.messages().len(), 2);
        assert_eq!(sink.on_topic("a").len(), 1);
        assert_eq!(sink.of_type("ping").len(), 2);

        sink.clear();
        assert!(sink.messages().is_empty());
    }

    #[tokio::test]
    async fn broker_delivers_to_every_subscriber_of_a_topic() {
        let broker = LocalBroker::new();
        let (first, mut first_rx) = Mailbox::channel("first", 4);
        let (second, mut second_rx) = Mailbox::channel("second", 4);
        broker.route("alerts", first);
        broker.route("alerts", second);

        broker.publish(message("alerts")).await.expect("publish");
        broker.publish(message("elsewhere")).await.expect("publish");

        assert_eq!(broker.subscribers("alerts"), vec!["first".to_string(), "second".to_string()]);
        assert_eq!(first_rx.try_recv().expect("first copy").target_topic, "alerts");
        assert_eq!(second_rx.try_recv().expect("second copy").target_topic, "alerts");
        assert!(first_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broker_drops_copies_for_full_mailboxes() {
        let broker = LocalBroker::new();
        let (mailbox, mut receiver) = Mailbox::channel("slow", 1);
        broker.route("alerts", mailbox.clone());

        broker.publish(message("alerts")).await.expect("publish");
        broker.publish(message("alerts")).await.expect("second publish still succeeds");

        assert!(receiver.try_recv().is_ok());
        assert!(receiver.try_recv().is_err());
        assert_eq!(mailbox.rejected(), 1);
    }
}
