//! Event ingestion: push and pull intake, dedup, partitioned processing.
//!
//! Webhook events arrive through [`EventIngestionAgent::on_inbound_event`]
//! and mailbox messages; the poller tick pulls changes from a
//! [`ChangeFeed`]. Everything lands in one bounded buffer. The processing
//! tick drains it in batches, hashes each event onto a partition and runs
//! one worker per non-empty partition, so order holds within a partition
//! only.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use slawatch_core::config::AppConfig;
use slawatch_core::domain::event::{Event, EventSource};
use slawatch_core::domain::message::{payload_from, AgentMessage, Payload, HIGHEST_PRIORITY};
use slawatch_core::domain::sla::{SlaAlert, SlaPolicySet};
use slawatch_core::domain::ticket::{MonitoredTicket, Ticket};
use slawatch_core::errors::{CollaboratorError, DomainError};
use slawatch_core::ingest::{distribute, SeenSet, TicketCache, TicketChange};
use slawatch_core::sla::{self, SlaThresholds};
use slawatch_core::topics;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::collaborators::{ChangeFeed, PolicySource, ResourceKind, ResourceRecord, TicketSource};
use crate::error::AgentError;
use crate::runtime::{AgentContext, PeriodicTask, Subagent};

pub const AGENT_NAME: &str = "event_ingestion";

const POLL_TASK: &str = "poll_changes";
const PROCESS_TASK: &str = "process_events";

pub const WEBHOOK_EVENT: &str = "webhook_event";
pub const POLLING_REQUEST: &str = "polling_request";
pub const SLA_CHECK: &str = "sla_check";
pub const POLLING_COMPLETED: &str = "polling_completed";
pub const EVENT_PROCESSED: &str = "event_processed";
pub const SLA_BREACH_DETECTED: &str = "sla_breach_detected";

#[derive(Clone, Debug)]
pub struct IngestionSettings {
    pub polling_interval: Duration,
    pub processing_interval: Duration,
    pub buffer_size: usize,
    pub batch_size: usize,
    pub partitions: usize,
    pub dedup_capacity: usize,
    pub ticket_cache_capacity: usize,
    pub thresholds: SlaThresholds,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl IngestionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            polling_interval: config.ingestion.polling_interval(),
            processing_interval: config.ingestion.processing_interval(),
            buffer_size: config.ingestion.buffer_size,
            batch_size: config.ingestion.batch_size,
            partitions: config.ingestion.partitions,
            dedup_capacity: config.ingestion.dedup_capacity,
            ticket_cache_capacity: config.ingestion.ticket_cache_capacity,
            thresholds: config.sla.thresholds(),
        }
    }
}

/// Outcome of handing one event to the ingestion buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundAck {
    Accepted,
    Duplicate,
    BufferFull,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    duplicates: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    polls_failed: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IngestionCounters {
    pub received: u64,
    pub duplicates: u64,
    pub processed: u64,
    pub failed: u64,
    pub dropped: u64,
    pub polls_failed: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IngestionStatus {
    pub monitored_tickets: usize,
    pub events_buffered: usize,
    pub processed_event_ids: usize,
    pub partitions: usize,
    pub last_poll_timestamp: DateTime<Utc>,
    pub sla_policies_loaded: usize,
    pub counters: IngestionCounters,
}

/// State shared by the mailbox loop, the ticks, partition workers and
/// external readers. Lock order: `buffer` before `seen`.
struct IngestionState {
    settings: IngestionSettings,
    buffer: Mutex<VecDeque<Event>>,
    seen: Mutex<SeenSet>,
    tickets: Mutex<TicketCache>,
    policies: RwLock<SlaPolicySet>,
    last_poll: Mutex<DateTime<Utc>>,
    counters: Counters,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl IngestionState {
    fn new(settings: IngestionSettings) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::new()),
            seen: Mutex::new(SeenSet::new(settings.dedup_capacity)),
            tickets: Mutex::new(TicketCache::new(settings.ticket_cache_capacity)),
            policies: RwLock::new(SlaPolicySet::default()),
            last_poll: Mutex::new(Utc::now()),
            counters: Counters::default(),
            settings,
        }
    }

    fn enqueue(&self, event: Event) -> InboundAck {
        Counters::bump(&self.counters.received);

        let mut buffer = lock(&self.buffer);
        if buffer.len() >= self.settings.buffer_size {
            Counters::bump(&self.counters.dropped);
            warn!(
                event_name = "ingestion.event.buffer_full",
                event_id = %event.id,
                buffered = buffer.len(),
                "event buffer full; event rejected"
            );
            return InboundAck::BufferFull;
        }
        if !lock(&self.seen).insert(&event.id) {
            Counters::bump(&self.counters.duplicates);
            debug!(
                event_name = "ingestion.event.duplicate",
                event_id = %event.id,
                "duplicate event discarded"
            );
            return InboundAck::Duplicate;
        }

        debug!(
            event_name = "ingestion.event.buffered",
            event_id = %event.id,
            event_type = %event.event_type,
            source = event.source.as_str(),
            "event buffered"
        );
        buffer.push_back(event);
        InboundAck::Accepted
    }

    fn take_batch(&self) -> Vec<Event> {
        let mut buffer = lock(&self.buffer);
        let count = self.settings.batch_size.max(1).min(buffer.len());
        buffer.drain(..count).collect()
    }

    fn check_ticket(&self, ticket_id: &str, now: DateTime<Utc>) -> Option<SlaAlert> {
        let ticket = lock(&self.tickets).get(ticket_id)?.to_ticket();
        let policies = self.policies.read().unwrap_or_else(PoisonError::into_inner);
        let policy = policies.get(ticket.priority)?;
        sla::evaluate(&ticket, policy, &self.settings.thresholds, now)
    }

    /// Runs one event through the ticket cache and SLA check, then publishes
    /// it as processed.
    async fn process_event(&self, mut event: Event, ctx: &AgentContext) -> Result<(), DomainError> {
        let now = Utc::now();
        if event.is_ticket_event() {
            if let Some((change, ticket)) = lock(&self.tickets).apply(&event, now)? {
                debug!(
                    event_name = "ingestion.ticket.updated",
                    ticket_id = %ticket.ticket_id,
                    created = change == TicketChange::Created,
                    update_count = ticket.update_count,
                    "ticket cache updated"
                );
            }
        }

        if event.affects_sla() {
            let alert = event.ticket_id().and_then(|ticket_id| self.check_ticket(ticket_id, now));
            if let Some(alert) = alert {
                info!(
                    event_name = "ingestion.sla.breach_detected",
                    ticket_id = %alert.ticket_id,
                    alert_type = alert.alert_type.as_str(),
                    "event triggered SLA alert"
                );
                ctx.publish(breach_message(ctx, &alert)).await;
            }
        }

        event.processed = true;
        let mut payload = Payload::new();
        payload.insert("original_event".to_string(), Value::Object(payload_from(&event)));
        payload.insert("processing_timestamp".to_string(), json!(Utc::now().to_rfc3339()));
        let message = ctx
            .message(topics::EVENT_STREAM, EVENT_PROCESSED, payload)
            .with_id(format!("processed_{}", event.id))
            .with_priority(event.priority);
        ctx.publish(message).await;
        Ok(())
    }

    async fn process_partition(self: Arc<Self>, events: Vec<Event>, ctx: AgentContext) {
        for event in events {
            let event_id = event.id.clone();
            match self.process_event(event, &ctx).await {
                Ok(()) => Counters::bump(&self.counters.processed),
                Err(error) => {
                    Counters::bump(&self.counters.failed);
                    warn!(
                        event_name = "ingestion.event.failed",
                        event_id = %event_id,
                        error = %error,
                        "event processing failed; skipped"
                    );
                }
            }
        }
    }

    fn status(&self) -> IngestionStatus {
        let counters = &self.counters;
        IngestionStatus {
            monitored_tickets: lock(&self.tickets).len(),
            events_buffered: lock(&self.buffer).len(),
            processed_event_ids: lock(&self.seen).len(),
            partitions: self.settings.partitions.max(1),
            last_poll_timestamp: *lock(&self.last_poll),
            sla_policies_loaded: self.policies.read().unwrap_or_else(PoisonError::into_inner).len(),
            counters: IngestionCounters {
                received: counters.received.load(Ordering::Relaxed),
                duplicates: counters.duplicates.load(Ordering::Relaxed),
                processed: counters.processed.load(Ordering::Relaxed),
                failed: counters.failed.load(Ordering::Relaxed),
                dropped: counters.dropped.load(Ordering::Relaxed),
                polls_failed: counters.polls_failed.load(Ordering::Relaxed),
            },
        }
    }
}

fn breach_message(ctx: &AgentContext, alert: &SlaAlert) -> AgentMessage {
    let mut payload = Payload::new();
    payload.insert("sla_breach".to_string(), Value::Object(payload_from(alert)));
    ctx.message(topics::SLA_BREACH_NOTICES, SLA_BREACH_DETECTED, payload)
        .with_id(format!("sla_breach_{}_{}", alert.ticket_id, alert.timestamp.to_rfc3339()))
        .with_priority(HIGHEST_PRIORITY)
}

fn record_event(record: ResourceRecord, kind: ResourceKind) -> Event {
    let mut data = record.data;
    data.entry("resource_type").or_insert_with(|| json!(kind.as_str()));
    data.entry("changed_at").or_insert_with(|| json!(record.changed_at.to_rfc3339()));
    let priority = slawatch_core::domain::event::classify_priority(&record.event_type);
    Event::new(record.id, record.event_type, EventSource::Poll, data).with_priority(priority)
}

/// Mailbox commands understood by the ingestion agent.
#[derive(Clone, Debug, PartialEq)]
enum IngestionCommand {
    WebhookEvent(Event),
    PollingRequest { kind: ResourceKind, since: Option<DateTime<Utc>> },
    SlaCheck { ticket_id: Option<String> },
    Unknown(String),
}

impl IngestionCommand {
    fn parse(message: &AgentMessage) -> Result<Self, AgentError> {
        match message.message_type.as_str() {
            WEBHOOK_EVENT => {
                let data = message.payload_object("event_data").cloned().ok_or_else(|| {
                    AgentError::InvalidMessage(format!(
                        "`{WEBHOOK_EVENT}` needs an `event_data` object"
                    ))
                })?;
                let id = data
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("msg_{}", message.id));
                let event_type =
                    data.get("event_type").and_then(Value::as_str).unwrap_or("unknown").to_string();
                Ok(Self::WebhookEvent(
                    Event::new(id, event_type, EventSource::Message, data)
                        .with_priority(message.priority()),
                ))
            }
            POLLING_REQUEST => {
                let endpoint = message.payload_str("endpoint").unwrap_or("tickets");
                let kind = ResourceKind::parse(endpoint).ok_or_else(|| {
                    AgentError::InvalidMessage(format!("unknown polling endpoint `{endpoint}`"))
                })?;
                let since = match message.payload_str("since_timestamp") {
                    Some(value) => Some(
                        DateTime::parse_from_rfc3339(value)
                            .map(|parsed| parsed.with_timezone(&Utc))
                            .map_err(|_| {
                                AgentError::InvalidMessage(format!(
                                    "invalid since_timestamp `{value}`"
                                ))
                            })?,
                    ),
                    None => None,
                };
                Ok(Self::PollingRequest { kind, since })
            }
            SLA_CHECK => Ok(Self::SlaCheck {
                ticket_id: message.payload_str("ticket_id").map(str::to_string),
            }),
            other => Ok(Self::Unknown(other.to_string())),
        }
    }
}

pub struct EventIngestionAgent {
    state: Arc<IngestionState>,
    changes: Arc<dyn ChangeFeed>,
    policies: Arc<dyn PolicySource>,
}

impl EventIngestionAgent {
    pub fn new(
        settings: IngestionSettings,
        changes: Arc<dyn ChangeFeed>,
        policies: Arc<dyn PolicySource>,
    ) -> Self {
        Self { state: Arc::new(IngestionState::new(settings)), changes, policies }
    }

    /// Push entry point for the webhook layer.
    pub fn on_inbound_event(&self, raw: Payload) -> InboundAck {
        let event = Event::from_raw(raw, EventSource::Webhook);
        info!(
            event_name = "ingestion.webhook.received",
            event_id = %event.id,
            event_type = %event.event_type,
            "webhook event received"
        );
        self.state.enqueue(event)
    }

    pub fn monitoring_status(&self) -> IngestionStatus {
        self.state.status()
    }

    pub fn monitored_ticket(&self, ticket_id: &str) -> Option<MonitoredTicket> {
        lock(&self.state.tickets).get(ticket_id).cloned()
    }

    /// Read-only view of the ticket cache, usable as a [`TicketSource`].
    pub fn ticket_view(&self) -> CachedTickets {
        CachedTickets { state: self.state.clone() }
    }

    /// Drains the buffer batch by batch until it is empty. Returns the
    /// number of events handed to partition workers.
    pub async fn process_pending(&self, ctx: &AgentContext) -> usize {
        let mut handled = 0;
        loop {
            let batch = self.state.take_batch();
            if batch.is_empty() {
                return handled;
            }
            handled += batch.len();

            let partitions =
                distribute(batch, self.state.settings.partitions, |event| event.id.as_str());
            let mut workers = JoinSet::new();
            for partition in partitions.into_iter().filter(|partition| !partition.is_empty()) {
                workers.spawn(self.state.clone().process_partition(partition, ctx.clone()));
            }
            while let Some(joined) = workers.join_next().await {
                if let Err(error) = joined {
                    warn!(
                        event_name = "ingestion.partition.worker_failed",
                        error = %error,
                        "partition worker aborted"
                    );
                }
            }
        }
    }

    async fn poll(
        &self,
        kind: ResourceKind,
        since: DateTime<Utc>,
        ctx: &AgentContext,
    ) -> Result<Vec<Event>, AgentError> {
        let changes = self.changes.clone();
        let records =
            ctx.call_remote(|| async move { changes.list_changes(kind, since).await }).await?;
        Ok(records.into_iter().map(|record| record_event(record, kind)).collect())
    }

    /// One poller cycle over tickets and tasks. `since` only moves forward
    /// once both polls succeed.
    pub async fn poll_once(&self, ctx: &AgentContext) -> Result<usize, AgentError> {
        let started = Utc::now();
        let since = *lock(&self.state.last_poll);

        let mut events = Vec::new();
        for kind in ResourceKind::ALL {
            match self.poll(kind, since, ctx).await {
                Ok(found) => events.extend(found),
                Err(error) => {
                    Counters::bump(&self.state.counters.polls_failed);
                    warn!(
                        event_name = "ingestion.poll.failed",
                        resource = kind.as_str(),
                        since = %since,
                        error = %error,
                        "poll failed; cursor not advanced"
                    );
                    return Err(error);
                }
            }
        }

        let found = events.len();
        for event in events {
            self.state.enqueue(event);
        }
        *lock(&self.state.last_poll) = started;
        debug!(
            event_name = "ingestion.poll.completed",
            events_found = found,
            "poll cycle completed"
        );
        Ok(found)
    }

    async fn handle_command(
        &self,
        command: IngestionCommand,
        message: &AgentMessage,
        ctx: &AgentContext,
    ) -> Result<Option<AgentMessage>, AgentError> {
        match command {
            IngestionCommand::WebhookEvent(event) => {
                self.state.enqueue(event);
                Ok(None)
            }
            IngestionCommand::PollingRequest { kind, since } => {
                let since = since.unwrap_or_else(|| *lock(&self.state.last_poll));
                let events = self.poll(kind, since, ctx).await?;
                let snapshot: Vec<Value> =
                    events.iter().map(|event| Value::Object(payload_from(event))).collect();
                let found = events.len();
                for event in events {
                    self.state.enqueue(event);
                }

                let mut payload = Payload::new();
                payload.insert("endpoint".to_string(), json!(kind.as_str()));
                payload.insert("events_found".to_string(), json!(found));
                payload.insert("events".to_string(), Value::Array(snapshot));
                Ok(Some(
                    ctx.message(topics::EVENT_STREAM, POLLING_COMPLETED, payload)
                        .with_id(format!("poll_response_{}", message.id)),
                ))
            }
            IngestionCommand::SlaCheck { ticket_id: Some(ticket_id) } => {
                let alert = self.state.check_ticket(&ticket_id, Utc::now());
                Ok(alert.map(|alert| breach_message(ctx, &alert)))
            }
            IngestionCommand::SlaCheck { ticket_id: None } => {
                debug!(
                    event_name = "ingestion.message.ignored",
                    message_id = %message.id,
                    "sla_check without ticket_id ignored"
                );
                Ok(None)
            }
            IngestionCommand::Unknown(message_type) => {
                debug!(
                    event_name = "ingestion.message.ignored",
                    message_id = %message.id,
                    message_type = %message_type,
                    "unknown message type ignored"
                );
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Subagent for EventIngestionAgent {
    fn name(&self) -> &str {
        AGENT_NAME
    }

    async fn initialize(&self, ctx: &AgentContext) -> Result<(), AgentError> {
        let source = self.policies.clone();
        let policies = ctx
            .call_remote(|| async move { source.load_policies().await })
            .await
            .map_err(|error| AgentError::Startup(format!("could not load SLA policies: {error}")))?;
        let loaded = policies.len();
        *self.state.policies.write().unwrap_or_else(PoisonError::into_inner) = policies;
        *lock(&self.state.last_poll) = Utc::now();

        ctx.subscribe(topics::WEBHOOK_EVENTS);
        ctx.subscribe(topics::POLLING_REQUESTS);
        ctx.register_publication(topics::EVENT_STREAM);
        ctx.register_publication(topics::SLA_BREACH_NOTICES);

        info!(
            event_name = "ingestion.agent.initialized",
            sla_policies_loaded = loaded,
            partitions = self.state.settings.partitions.max(1),
            "ingestion agent initialized"
        );
        Ok(())
    }

    async fn process_message(
        &self,
        message: &AgentMessage,
        ctx: &AgentContext,
    ) -> Result<Option<AgentMessage>, AgentError> {
        let command = IngestionCommand::parse(message)?;
        self.handle_command(command, message, ctx).await
    }

    async fn cleanup(&self, _ctx: &AgentContext) {
        let status = self.state.status();
        info!(
            event_name = "ingestion.agent.stopped",
            events_buffered = status.events_buffered,
            processed = status.counters.processed,
            "ingestion agent stopped"
        );
    }

    fn periodic_tasks(&self) -> Vec<PeriodicTask> {
        vec![
            PeriodicTask::new(POLL_TASK, self.state.settings.polling_interval),
            PeriodicTask::new(PROCESS_TASK, self.state.settings.processing_interval),
        ]
    }

    async fn on_tick(&self, task: &str, ctx: &AgentContext) -> Result<(), AgentError> {
        match task {
            POLL_TASK => self.poll_once(ctx).await.map(|_| ()),
            PROCESS_TASK => {
                self.process_pending(ctx).await;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Ticket source backed by the ingestion cache; only non-terminal tickets
/// count as active.
#[derive(Clone)]
pub struct CachedTickets {
    state: Arc<IngestionState>,
}

#[async_trait]
impl TicketSource for CachedTickets {
    async fn get_active_tickets(&self) -> Result<Vec<Ticket>, CollaboratorError> {
        Ok(lock(&self.state.tickets).active().iter().map(|ticket| ticket.to_ticket()).collect())
    }

    async fn get_ticket(&self, ticket_id: &str) -> Result<Option<Ticket>, CollaboratorError> {
        Ok(lock(&self.state.tickets).get(ticket_id).map(|ticket| ticket.to_ticket()))
    }
}
