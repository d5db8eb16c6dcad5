use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Map, Value};
use slawatch_agent::collaborators::{
    ChangeFeed, LoggingEscalationService, NoopChangeFeed, ResourceKind, ResourceRecord,
    StaticPolicySource,
};
use slawatch_agent::runtime::Mailbox;
use slawatch_agent::{
    EventIngestionAgent, InboundAck, IngestionSettings, LocalBroker, MessageSink, RuntimeSettings,
    SlaMonitorAgent, SlaMonitorSettings, SubagentRuntime,
};
use slawatch_core::domain::message::{AgentMessage, Payload};
use slawatch_core::errors::CollaboratorError;
use slawatch_core::topics;
use tokio::sync::{mpsc, Mutex};

struct Pipeline {
    broker: Arc<LocalBroker>,
    ingestion: SubagentRuntime<EventIngestionAgent>,
    monitor: SubagentRuntime<SlaMonitorAgent>,
    alerts: mpsc::Receiver<AgentMessage>,
}

fn runtime_settings() -> RuntimeSettings {
    RuntimeSettings {
        dequeue_timeout: Duration::from_millis(20),
        retry_base_delay: Duration::from_millis(5),
        ..RuntimeSettings::default()
    }
}

async fn pipeline(feed: Arc<dyn ChangeFeed>, polling_interval: Duration) -> Pipeline {
    let broker = Arc::new(LocalBroker::new());
    let policies = Arc::new(StaticPolicySource::default());

    let ingestion_settings = IngestionSettings {
        polling_interval,
        processing_interval: Duration::from_millis(20),
        partitions: 4,
        ..IngestionSettings::default()
    };
    let ingestion_agent = EventIngestionAgent::new(ingestion_settings, feed, policies.clone());
    let tickets = Arc::new(ingestion_agent.ticket_view());
    let ingestion = SubagentRuntime::new(ingestion_agent, runtime_settings(), broker.clone());

    let monitor_agent = SlaMonitorAgent::new(
        SlaMonitorSettings {
            check_interval: Duration::from_secs(3600),
            ..SlaMonitorSettings::default()
        },
        tickets,
        policies,
        Arc::new(LoggingEscalationService),
    );
    let monitor = SubagentRuntime::new(monitor_agent, runtime_settings(), broker.clone());

    let (observer, alerts) = Mailbox::channel("observer", 64);
    for topic in [topics::SLA_BREACH_ALERT, topics::SLA_CRITICAL_ALERT, topics::SLA_WARNING_ALERT] {
        broker.route(topic, observer.clone());
    }

    // Subscribers first, so nothing ingestion publishes on startup is lost.
    monitor.start().await.expect("monitor starts");
    broker.attach(&monitor);
    ingestion.start().await.expect("ingestion starts");
    broker.attach(&ingestion);

    Pipeline { broker, ingestion, monitor, alerts }
}

impl Pipeline {
    async fn shutdown(&self) {
        self.ingestion.stop().await;
        self.monitor.stop().await;
    }

    async fn next_alert(&mut self) -> AgentMessage {
        tokio::time::timeout(Duration::from_secs(5), self.alerts.recv())
            .await
            .expect("alert within timeout")
            .expect("observer channel open")
    }
}

fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn ticket_created(event_id: &str, ticket_id: &str, priority: &str, minutes_ago: i64) -> Payload {
    payload(json!({
        "id": event_id,
        "event_type": "ticket_created",
        "ticket_id": ticket_id,
        "priority": priority,
        "status": "open",
        "created_at": (Utc::now() - ChronoDuration::minutes(minutes_ago)).to_rfc3339(),
    }))
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..250 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn overdue_critical_ticket_alerts_once_and_low_ticket_stays_quiet() {
    let mut pipeline = pipeline(Arc::new(NoopChangeFeed), Duration::from_secs(3600)).await;
    let ingestion = pipeline.ingestion.agent().clone();

    let t1 = ticket_created("evt-t1", "T1", "critical", 65);
    assert_eq!(ingestion.on_inbound_event(t1.clone()), InboundAck::Accepted);
    assert_eq!(ingestion.on_inbound_event(t1), InboundAck::Duplicate);
    let t2 = ticket_created("evt-t2", "T2", "low", 120);
    assert_eq!(ingestion.on_inbound_event(t2), InboundAck::Accepted);

    let alert = pipeline.next_alert().await;
    assert_eq!(alert.target_topic, topics::SLA_BREACH_ALERT);
    assert_eq!(alert.source_agent, "sla_monitor");
    assert_eq!(alert.payload["alert"]["ticket_id"], json!("T1"));
    assert_eq!(alert.payload["alert"]["sla_type"], json!("response"));
    assert_eq!(alert.payload["alert"]["escalation_required"], json!(true));

    wait_for(|| ingestion.monitoring_status().counters.processed == 2).await;
    let t1 = ingestion.monitored_ticket("T1").expect("T1 cached");
    assert_eq!(t1.update_count, 1);
    assert_eq!(ingestion.monitoring_status().counters.duplicates, 1);

    let monitor = pipeline.monitor.agent().clone();
    let emitted = monitor.force_check(pipeline.monitor.context(), None).await.expect("sweep");
    assert_eq!(emitted, 0, "T1 is in cooldown and T2 is within its SLA");
    assert!(pipeline.alerts.try_recv().is_err());

    let metrics = monitor.sla_metrics();
    assert_eq!(metrics.alerts_sent, 1);
    assert_eq!(metrics.breach_count, 1);
    assert_eq!(metrics.escalations_triggered, 1);
    assert_eq!(monitor.current_alerts().len(), 1);

    assert!(pipeline.ingestion.health().is_healthy());
    assert!(pipeline.monitor.health().is_healthy());
    assert!(pipeline.broker.subscribers(topics::EVENT_STREAM).is_empty());
    assert_eq!(
        pipeline.broker.subscribers(topics::SLA_BREACH_NOTICES),
        vec!["sla_monitor".to_string()]
    );
    pipeline.shutdown().await;
}

#[derive(Default)]
struct ScriptedFeed {
    tickets: Mutex<VecDeque<Vec<ResourceRecord>>>,
}

#[async_trait]
impl ChangeFeed for ScriptedFeed {
    async fn list_changes(
        &self,
        kind: ResourceKind,
        _since: DateTime<Utc>,
    ) -> Result<Vec<ResourceRecord>, CollaboratorError> {
        match kind {
            ResourceKind::Tickets => Ok(self.tickets.lock().await.pop_front().unwrap_or_default()),
            ResourceKind::Tasks => Ok(Vec::new()),
        }
    }
}

#[tokio::test]
async fn polled_ticket_reaches_the_sla_monitor() {
    let feed = Arc::new(ScriptedFeed::default());
    feed.tickets.lock().await.push_back(vec![ResourceRecord {
        id: "poll-t3".into(),
        event_type: "ticket_created".into(),
        data: payload(json!({
            "ticket_id": "T3",
            "priority": "high",
            "status": "open",
            "customer": {"tier": "premium"},
            "created_at": (Utc::now() - ChronoDuration::hours(5)).to_rfc3339(),
        })),
        changed_at: Utc::now(),
    }]);

    let mut pipeline = pipeline(feed, Duration::from_millis(50)).await;

    let alert = pipeline.next_alert().await;
    assert_eq!(alert.payload["alert"]["ticket_id"], json!("T3"));
    assert_eq!(alert.payload["alert"]["customer_impact"], json!("high"));

    let status = pipeline.ingestion.agent().monitoring_status();
    assert_eq!(status.monitored_tickets, 1);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn check_request_routed_through_broker() {
    let mut pipeline = pipeline(Arc::new(NoopChangeFeed), Duration::from_secs(3600)).await;
    let ingestion = pipeline.ingestion.agent().clone();
    ingestion.on_inbound_event(ticket_created("evt-t4", "T4", "medium", 9 * 60));
    let alert = pipeline.next_alert().await;
    assert_eq!(alert.payload["alert"]["ticket_id"], json!("T4"));

    let mut request = Map::new();
    request.insert("ticket_id".into(), json!("T4"));
    pipeline
        .broker
        .publish(AgentMessage::new("ops", topics::SLA_CHECK_REQUEST, "sla_check", request))
        .await
        .expect("publish");

    let monitor = pipeline.monitor.agent().clone();
    let runtime = &pipeline.monitor;
    wait_for(|| runtime.status().metrics.messages_processed >= 3).await;
    assert_eq!(monitor.sla_metrics().alerts_sent, 1, "cooldown holds for routed re-checks");
    pipeline.shutdown().await;
}
