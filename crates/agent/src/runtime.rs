use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use slawatch_core::config::AppConfig;
use slawatch_core::domain::message::{AgentMessage, Payload};
use slawatch_core::domain::metrics::{MetricsRecorder, MetricsSnapshot};
use slawatch_core::errors::CollaboratorError;
use slawatch_core::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState, RateLimiter,
    RateLimiterConfig,
};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::AgentError;
use crate::sink::MessageSink;

#[derive(Clone, Debug)]
pub struct RuntimeSettings {
    pub mailbox_capacity: usize,
    pub dequeue_timeout: Duration,
    pub retry_base_delay: Duration,
    pub max_retries: u32,
    pub health_error_rate_threshold: f64,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limiter: RateLimiterConfig,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1_000,
            dequeue_timeout: Duration::from_secs(1),
            retry_base_delay: Duration::from_secs(1),
            max_retries: 3,
            health_error_rate_threshold: 0.1,
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limiter: RateLimiterConfig::default(),
        }
    }
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            mailbox_capacity: config.runtime.mailbox_capacity,
            dequeue_timeout: config.runtime.dequeue_timeout(),
            retry_base_delay: config.runtime.retry_base_delay(),
            max_retries: config.runtime.max_retries,
            health_error_rate_threshold: config.runtime.health_error_rate_threshold,
            circuit_breaker: config.resilience.circuit_breaker(),
            rate_limiter: config.resilience.rate_limiter(),
        }
    }

    /// Delay before retry number `retry_count` (1-based): `base * 2^retry_count`.
    fn retry_delay(&self, retry_count: u32) -> Duration {
        let multiplier = 1_u32 << retry_count.min(16);
        self.retry_base_delay.saturating_mul(multiplier)
    }
}

/// A named tick the runtime drives on a fixed interval while the agent runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeriodicTask {
    pub name: &'static str,
    pub interval: Duration,
}

impl PeriodicTask {
    pub fn new(name: &'static str, interval: Duration) -> Self {
        Self { name, interval }
    }
}

/// Behaviour plugged into a [`SubagentRuntime`].
///
/// Agents are shared between the mailbox loop, their periodic tasks and
/// external queries, so every hook takes `&self`.
#[async_trait]
pub trait Subagent: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Runs before any message or tick. An error aborts `start`.
    async fn initialize(&self, _ctx: &AgentContext) -> Result<(), AgentError> {
        Ok(())
    }

    /// Handles one mailbox message. A returned message is published.
    async fn process_message(
        &self,
        message: &AgentMessage,
        ctx: &AgentContext,
    ) -> Result<Option<AgentMessage>, AgentError>;

    async fn cleanup(&self, _ctx: &AgentContext) {}

    fn periodic_tasks(&self) -> Vec<PeriodicTask> {
        Vec::new()
    }

    async fn on_tick(&self, _task: &str, _ctx: &AgentContext) -> Result<(), AgentError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct TopicRegistry {
    subscriptions: BTreeSet<String>,
    publications: BTreeSet<String>,
}

/// Handle an agent uses to reach the outside: publishing, remote calls and
/// topic registration. Cheap to clone.
#[derive(Clone)]
pub struct AgentContext {
    agent: Arc<str>,
    max_retries: u32,
    sink: Arc<dyn MessageSink>,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    registry: Arc<StdMutex<TopicRegistry>>,
}

impl AgentContext {
    fn new(agent: &str, settings: &RuntimeSettings, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            agent: Arc::from(agent),
            max_retries: settings.max_retries,
            sink,
            breaker: Arc::new(CircuitBreaker::new(agent, settings.circuit_breaker.clone())),
            limiter: Arc::new(RateLimiter::new(settings.rate_limiter.clone())),
            registry: Arc::new(StdMutex::new(TopicRegistry::default())),
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent
    }

    /// New outbound message stamped with this agent as its source.
    pub fn message(
        &self,
        topic: impl Into<String>,
        message_type: impl Into<String>,
        payload: Payload,
    ) -> AgentMessage {
        AgentMessage::new(self.agent.as_ref(), topic, message_type, payload)
            .with_max_retries(self.max_retries)
    }

    /// Hands a message to the sink. Sink failures are logged, never raised.
    pub async fn publish(&self, message: AgentMessage) {
        let message_id = message.id.clone();
        let topic = message.target_topic.clone();
        if let Err(error) = self.sink.publish(message).await {
            warn!(
                event_name = "agent.message.publish_failed",
                agent = %self.agent,
                message_id = %message_id,
                topic = %topic,
                error = %error,
                "failed to publish message"
            );
        }
    }

    /// Runs a remote call behind the agent's rate limiter and circuit breaker.
    pub async fn call_remote<F, Fut, T>(&self, operation: F) -> Result<T, AgentError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, CollaboratorError>> + Send,
        T: Send,
    {
        self.limiter.wait_for_slot().await;
        self.breaker.call(operation).await.map_err(AgentError::from)
    }

    /// Records interest in a topic. Per-topic handling is the agent's own
    /// routing inside `process_message`.
    pub fn subscribe(&self, topic: impl Into<String>) {
        let topic = topic.into();
        debug!(
            event_name = "agent.topic.subscribed",
            agent = %self.agent,
            topic = %topic,
            "subscribed"
        );
        self.registry().subscriptions.insert(topic);
    }

    pub fn register_publication(&self, topic: impl Into<String>) {
        self.registry().publications.insert(topic.into());
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.registry().subscriptions.iter().cloned().collect()
    }

    pub fn publications(&self) -> Vec<String> {
        self.registry().publications.iter().cloned().collect()
    }

    pub fn circuit(&self) -> CircuitSnapshot {
        self.breaker.snapshot()
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, TopicRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sending half of an agent's bounded mailbox.
#[derive(Clone)]
pub struct Mailbox {
    agent: Arc<str>,
    sender: mpsc::Sender<AgentMessage>,
    metrics: Arc<MetricsRecorder>,
}

impl Mailbox {
    fn new(agent: &str, sender: mpsc::Sender<AgentMessage>, metrics: Arc<MetricsRecorder>) -> Self {
        Self { agent: Arc::from(agent), sender, metrics }
    }

    /// Standalone mailbox with its own receiver and counters.
    pub fn channel(agent: &str, capacity: usize) -> (Self, mpsc::Receiver<AgentMessage>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self::new(agent, sender, Arc::new(MetricsRecorder::new())), receiver)
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Enqueues without waiting. A full mailbox rejects the message and
    /// counts the rejection.
    pub fn deliver(&self, message: AgentMessage) -> Result<(), AgentError> {
        match self.sender.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(message)) => {
                self.metrics.record_rejection();
                warn!(
                    event_name = "agent.mailbox.rejected",
                    agent = %self.agent,
                    message_id = %message.id,
                    message_type = %message.message_type,
                    "mailbox full; message rejected"
                );
                Err(AgentError::MailboxFull { agent: self.agent.to_string() })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(AgentError::NotRunning(self.agent.to_string()))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn rejected(&self) -> u64 {
        self.metrics.snapshot().messages_rejected
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AgentHealth {
    pub agent_name: String,
    pub status: HealthStatus,
    pub is_running: bool,
    pub error_rate: f64,
    pub circuit_breaker_state: CircuitState,
    pub queue_size: usize,
}

impl AgentHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AgentStatus {
    pub agent_name: String,
    pub is_running: bool,
    pub metrics: MetricsSnapshot,
    pub subscriptions: Vec<String>,
    pub publications: Vec<String>,
    pub queue_size: usize,
    pub circuit_breaker: CircuitSnapshot,
}

#[derive(Default)]
struct Lifecycle {
    shutdown: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

type ReceiverSlot = Arc<Mutex<Option<mpsc::Receiver<AgentMessage>>>>;

/// Drives one [`Subagent`]: a bounded mailbox consumed by a single loop,
/// the agent's periodic tasks, retries and metrics.
pub struct SubagentRuntime<A: Subagent> {
    agent: Arc<A>,
    settings: RuntimeSettings,
    context: AgentContext,
    metrics: Arc<MetricsRecorder>,
    mailbox: Mailbox,
    receiver: ReceiverSlot,
    running: Arc<AtomicBool>,
    lifecycle: Mutex<Lifecycle>,
}

impl<A: Subagent> SubagentRuntime<A> {
    pub fn new(agent: A, settings: RuntimeSettings, sink: Arc<dyn MessageSink>) -> Self {
        let agent = Arc::new(agent);
        let (sender, receiver) = mpsc::channel(settings.mailbox_capacity.max(1));
        let metrics = Arc::new(MetricsRecorder::new());
        let context = AgentContext::new(agent.name(), &settings, sink);
        let mailbox = Mailbox::new(agent.name(), sender, metrics.clone());

        Self {
            agent,
            settings,
            context,
            metrics,
            mailbox,
            receiver: Arc::new(Mutex::new(Some(receiver))),
            running: Arc::new(AtomicBool::new(false)),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    pub fn name(&self) -> &str {
        self.agent.name()
    }

    pub fn agent(&self) -> &Arc<A> {
        &self.agent
    }

    pub fn context(&self) -> &AgentContext {
        &self.context
    }

    pub fn mailbox(&self) -> Mailbox {
        self.mailbox.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Initializes the agent and launches its loop and periodic tasks.
    /// Calling it on a running agent does nothing.
    pub async fn start(&self) -> Result<(), AgentError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.is_running() {
            return Ok(());
        }

        info!(event_name = "agent.runtime.starting", agent = self.name(), "starting agent");
        if let Err(error) = self.agent.initialize(&self.context).await {
            error!(
                event_name = "agent.runtime.start_failed",
                agent = self.name(),
                error = %error,
                "agent initialization failed"
            );
            return Err(match error {
                AgentError::Startup(_) => error,
                other => AgentError::Startup(other.to_string()),
            });
        }

        let Some(receiver) = self.receiver.lock().await.take() else {
            return Err(AgentError::Startup(format!(
                "mailbox for `{}` is already being consumed",
                self.name()
            )));
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        self.running.store(true, Ordering::SeqCst);
        self.metrics.mark_started(Utc::now());

        let mut tasks = Vec::new();
        let worker = MailboxWorker {
            agent: self.agent.clone(),
            context: self.context.clone(),
            settings: self.settings.clone(),
            metrics: self.metrics.clone(),
            mailbox: self.mailbox.clone(),
        };
        let slot = self.receiver.clone();
        let loop_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            let receiver = worker.run(receiver, loop_shutdown).await;
            *slot.lock().await = Some(receiver);
        }));

        for task in self.agent.periodic_tasks() {
            tasks.push(tokio::spawn(run_periodic(
                self.agent.clone(),
                self.context.clone(),
                task,
                shutdown_rx.clone(),
            )));
        }

        lifecycle.shutdown = Some(shutdown);
        lifecycle.tasks = tasks;
        info!(event_name = "agent.runtime.started", agent = self.name(), "agent started");
        Ok(())
    }

    /// Signals shutdown, waits for the loop to finish its in-flight message
    /// and runs cleanup. Calling it on a stopped agent does nothing.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if !self.is_running() {
            return;
        }

        info!(event_name = "agent.runtime.stopping", agent = self.name(), "stopping agent");
        self.running.store(false, Ordering::SeqCst);
        if let Some(shutdown) = lifecycle.shutdown.take() {
            let _ = shutdown.send(true);
        }
        for task in lifecycle.tasks.drain(..) {
            if let Err(error) = task.await {
                warn!(
                    event_name = "agent.runtime.task_join_failed",
                    agent = self.name(),
                    error = %error,
                    "agent task did not shut down cleanly"
                );
            }
        }

        self.agent.cleanup(&self.context).await;
        info!(event_name = "agent.runtime.stopped", agent = self.name(), "agent stopped");
    }

    /// Enqueues a message for this agent without waiting.
    pub fn send_message(&self, message: AgentMessage) -> Result<(), AgentError> {
        self.mailbox.deliver(message)
    }

    pub fn queue_size(&self) -> usize {
        self.mailbox.len()
    }

    pub fn health(&self) -> AgentHealth {
        let error_rate = self.metrics.error_rate();
        let is_running = self.is_running();
        let healthy = is_running && error_rate < self.settings.health_error_rate_threshold;

        AgentHealth {
            agent_name: self.name().to_string(),
            status: if healthy { HealthStatus::Healthy } else { HealthStatus::Unhealthy },
            is_running,
            error_rate,
            circuit_breaker_state: self.context.breaker.state(),
            queue_size: self.queue_size(),
        }
    }

    pub fn status(&self) -> AgentStatus {
        AgentStatus {
            agent_name: self.name().to_string(),
            is_running: self.is_running(),
            metrics: self.metrics.snapshot(),
            subscriptions: self.context.subscriptions(),
            publications: self.context.publications(),
            queue_size: self.queue_size(),
            circuit_breaker: self.context.circuit(),
        }
    }
}

struct MailboxWorker<A: Subagent> {
    agent: Arc<A>,
    context: AgentContext,
    settings: RuntimeSettings,
    metrics: Arc<MetricsRecorder>,
    mailbox: Mailbox,
}

impl<A: Subagent> MailboxWorker<A> {
    /// Consumes the mailbox until shutdown, then hands the receiver back.
    async fn run(
        &self,
        mut receiver: mpsc::Receiver<AgentMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) -> mpsc::Receiver<AgentMessage> {
        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                received = tokio::time::timeout(self.settings.dequeue_timeout, receiver.recv()) => {
                    match received {
                        Ok(Some(message)) => self.handle(message).await,
                        Ok(None) => break,
                        Err(_) => continue,
                    }
                }
            }
        }

        debug!(
            event_name = "agent.runtime.loop_exited",
            agent = self.context.agent_name(),
            "mailbox loop exited"
        );
        receiver
    }

    async fn handle(&self, mut message: AgentMessage) {
        let started = Instant::now();
        let outcome = self.agent.process_message(&message, &self.context).await;
        match outcome {
            Ok(response) => {
                if let Some(response) = response {
                    self.context.publish(response).await;
                }
                self.metrics.record_success(started.elapsed());
                debug!(
                    event_name = "agent.message.processed",
                    agent = self.context.agent_name(),
                    message_id = %message.id,
                    message_type = %message.message_type,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "message processed"
                );
            }
            Err(AgentError::CircuitOpen(breaker)) => {
                // Parked until the breaker can admit again; the retry budget is untouched.
                debug!(
                    event_name = "agent.message.deferred",
                    agent = self.context.agent_name(),
                    message_id = %message.id,
                    breaker = %breaker,
                    "circuit open; message deferred"
                );
                self.requeue(message, self.settings.retry_base_delay);
            }
            Err(error) if error.is_retryable() && message.record_retry() => {
                let delay = self.settings.retry_delay(message.retry_count);
                warn!(
                    event_name = "agent.message.retry_scheduled",
                    agent = self.context.agent_name(),
                    message_id = %message.id,
                    message_type = %message.message_type,
                    retry_count = message.retry_count,
                    max_retries = message.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "message processing failed; retry scheduled"
                );
                self.requeue(message, delay);
            }
            Err(error) => {
                self.metrics.record_failure();
                error!(
                    event_name = "agent.message.dropped",
                    agent = self.context.agent_name(),
                    message_id = %message.id,
                    message_type = %message.message_type,
                    retry_count = message.retry_count,
                    error = %error,
                    "message processing failed permanently"
                );
            }
        }
    }

    fn requeue(&self, message: AgentMessage, delay: Duration) {
        let mailbox = self.mailbox.clone();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let message_id = message.id.clone();
            if let Err(error) = mailbox.deliver(message) {
                metrics.record_failure();
                error!(
                    event_name = "agent.message.requeue_failed",
                    agent = mailbox.agent(),
                    message_id = %message_id,
                    error = %error,
                    "could not requeue message; dropped"
                );
            }
        });
    }
}

async fn run_periodic<A: Subagent>(
    agent: Arc<A>,
    context: AgentContext,
    task: PeriodicTask,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(task.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Err(error) = agent.on_tick(task.name, &context).await {
                    warn!(
                        event_name = "agent.runtime.tick_failed",
                        agent = context.agent_name(),
                        task = task.name,
                        error = %error,
                        "periodic task failed"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Map;
    use slawatch_core::domain::message::AgentMessage;
    use slawatch_core::resilience::{CircuitBreakerConfig, CircuitState, RateLimiterConfig};
    use tokio::sync::Mutex;

    use super::{
        AgentContext, HealthStatus, PeriodicTask, RuntimeSettings, Subagent, SubagentRuntime,
    };
    use crate::error::AgentError;
    use crate::sink::MemorySink;

    fn fast_settings() -> RuntimeSettings {
        RuntimeSettings {
            mailbox_capacity: 8,
            dequeue_timeout: Duration::from_millis(20),
            retry_base_delay: Duration::from_millis(1),
            max_retries: 3,
            health_error_rate_threshold: 0.1,
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 5,
                recovery_timeout: Duration::from_secs(60),
            },
            rate_limiter: RateLimiterConfig {
                max_requests: 100,
                time_window: Duration::from_secs(60),
                poll_interval: Duration::from_millis(5),
            },
        }
    }

    /// Plays back a fixed list of outcomes, then succeeds.
    struct ScriptedAgent {
        outcomes: Mutex<VecDeque<Result<(), AgentError>>>,
        calls: AtomicUsize,
        ticks: AtomicUsize,
        fail_start: bool,
        /// `(message id, retry count)` in processing order.
        seen: Mutex<Vec<(String, u32)>>,
    }

    impl ScriptedAgent {
        fn new(outcomes: Vec<Result<(), AgentError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicUsize::new(0),
                ticks: AtomicUsize::new(0),
                fail_start: false,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Subagent for ScriptedAgent {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn initialize(&self, ctx: &AgentContext) -> Result<(), AgentError> {
            if self.fail_start {
                return Err(AgentError::Processing("policy store offline".into()));
            }
            ctx.subscribe("work");
            ctx.register_publication("done");
            Ok(())
        }

        async fn process_message(
            &self,
            message: &AgentMessage,
            ctx: &AgentContext,
        ) -> Result<Option<AgentMessage>, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().await.push((message.id.clone(), message.retry_count));
            self.outcomes.lock().await.pop_front().unwrap_or(Ok(()))?;
            Ok(Some(ctx.message("done", "ack", Map::new()).with_id(format!("ack_{}", message.id))))
        }

        fn periodic_tasks(&self) -> Vec<PeriodicTask> {
            vec![PeriodicTask::new("heartbeat", Duration::from_millis(10))]
        }

        async fn on_tick(&self, _task: &str, _ctx: &AgentContext) -> Result<(), AgentError> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn work(id: &str) -> AgentMessage {
        AgentMessage::new("tester", "work", "job", Map::new()).with_id(id)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn processes_message_and_publishes_response() {
        let sink = Arc::new(MemorySink::new());
        let agent = ScriptedAgent::new(Vec::new());
        let runtime = SubagentRuntime::new(agent, fast_settings(), sink.clone());

        runtime.start().await.expect("start");
        runtime.send_message(work("m-1")).expect("send");
        wait_until(|| !sink.of_type("ack").is_empty()).await;
        runtime.stop().await;

        let status = runtime.status();
        assert_eq!(status.metrics.messages_processed, 1);
        assert_eq!(status.metrics.messages_failed, 0);
        assert_eq!(status.subscriptions, vec!["work".to_string()]);
        assert_eq!(status.publications, vec!["done".to_string()]);
        assert_eq!(sink.of_type("ack")[0].source_agent, "scripted");
    }

    #[tokio::test]
    async fn failing_message_is_attempted_max_retries_plus_one_times() {
        let sink = Arc::new(MemorySink::new());
        let failures = (0..4).map(|_| Err(AgentError::Processing("boom".into()))).collect();
        let runtime =
            SubagentRuntime::new(ScriptedAgent::new(failures), fast_settings(), sink.clone());

        runtime.start().await.expect("start");
        runtime.send_message(work("m-2")).expect("send");
        let agent = runtime.agent().clone();
        wait_until(|| {
            agent.calls.load(Ordering::SeqCst) == 4 && runtime.status().metrics.messages_failed == 1
        })
        .await;
        runtime.stop().await;

        let status = runtime.status();
        assert_eq!(status.metrics.messages_processed, 1);
        assert_eq!(status.metrics.messages_failed, 1);
        assert!(sink.of_type("ack").is_empty());
        assert_eq!(runtime.health().status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn transient_failure_recovers_on_retry() {
        let sink = Arc::new(MemorySink::new());
        let agent = ScriptedAgent::new(vec![Err(AgentError::Processing("flaky".into()))]);
        let runtime = SubagentRuntime::new(agent, fast_settings(), sink.clone());

        runtime.start().await.expect("start");
        runtime.send_message(work("m-3")).expect("send");
        wait_until(|| !sink.of_type("ack").is_empty()).await;
        runtime.stop().await;

        assert_eq!(runtime.agent().calls.load(Ordering::SeqCst), 2);
        let status = runtime.status();
        assert_eq!(status.metrics.messages_processed, 1);
        assert_eq!(status.metrics.messages_failed, 0);
    }

    #[tokio::test]
    async fn retried_message_rejoins_the_mailbox_behind_waiting_work() {
        let mut settings = fast_settings();
        settings.retry_base_delay = Duration::ZERO;
        let agent = ScriptedAgent::new(vec![Err(AgentError::Processing("flaky".into()))]);
        let runtime = SubagentRuntime::new(agent, settings, Arc::new(MemorySink::new()));

        runtime.send_message(work("r-1")).expect("send");
        runtime.send_message(work("r-2")).expect("send");
        runtime.start().await.expect("start");
        let agent = runtime.agent().clone();
        wait_until(|| agent.calls.load(Ordering::SeqCst) == 3).await;
        runtime.stop().await;

        let seen = agent.seen.lock().await.clone();
        assert_eq!(
            seen,
            vec![("r-1".to_string(), 0), ("r-2".to_string(), 0), ("r-1".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn open_circuit_defers_without_spending_the_retry_budget() {
        let sink = Arc::new(MemorySink::new());
        let agent = ScriptedAgent::new(vec![Err(AgentError::CircuitOpen("remote".into()))]);
        let runtime = SubagentRuntime::new(agent, fast_settings(), sink.clone());

        runtime.start().await.expect("start");
        runtime.send_message(work("c-1")).expect("send");
        wait_until(|| !sink.of_type("ack").is_empty()).await;
        runtime.stop().await;

        let seen = runtime.agent().seen.lock().await.clone();
        assert_eq!(seen, vec![("c-1".to_string(), 0), ("c-1".to_string(), 0)]);
        let status = runtime.status();
        assert_eq!(status.metrics.messages_processed, 1);
        assert_eq!(status.metrics.messages_failed, 0);
    }

    #[tokio::test]
    async fn stop_does_not_wait_out_a_long_dequeue_timeout() {
        let mut settings = fast_settings();
        settings.dequeue_timeout = Duration::from_secs(30);
        let agent = ScriptedAgent::new(Vec::new());
        let runtime = SubagentRuntime::new(agent, settings, Arc::new(MemorySink::new()));

        runtime.start().await.expect("start");
        tokio::time::sleep(Duration::from_millis(20)).await;
        tokio::time::timeout(Duration::from_secs(1), runtime.stop())
            .await
            .expect("stop returns while the loop is parked on an empty mailbox");

        assert!(!runtime.is_running());
    }

    #[tokio::test]
    async fn invalid_messages_are_dropped_without_retry() {
        let sink = Arc::new(MemorySink::new());
        let agent = ScriptedAgent::new(vec![Err(AgentError::InvalidMessage("no ticket".into()))]);
        let runtime = SubagentRuntime::new(agent, fast_settings(), sink);

        runtime.start().await.expect("start");
        runtime.send_message(work("m-4")).expect("send");
        wait_until(|| runtime.status().metrics.messages_failed == 1).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        runtime.stop().await;

        assert_eq!(runtime.agent().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn full_mailbox_rejects_and_counts() {
        let mut settings = fast_settings();
        settings.mailbox_capacity = 1;
        let agent = ScriptedAgent::new(Vec::new());
        let runtime = SubagentRuntime::new(agent, settings, Arc::new(MemorySink::new()));

        runtime.send_message(work("a")).expect("first fits");
        let rejected = runtime.send_message(work("b")).expect_err("mailbox full");

        assert_eq!(rejected, AgentError::MailboxFull { agent: "scripted".into() });
        assert_eq!(runtime.queue_size(), 1);
        assert_eq!(runtime.status().metrics.messages_rejected, 1);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent_and_restartable() {
        let sink = Arc::new(MemorySink::new());
        let agent = ScriptedAgent::new(Vec::new());
        let runtime = SubagentRuntime::new(agent, fast_settings(), sink.clone());

        runtime.start().await.expect("start");
        runtime.start().await.expect("second start is a no-op");
        assert!(runtime.is_running());
        assert_eq!(runtime.health().status, HealthStatus::Healthy);
        assert_eq!(runtime.health().circuit_breaker_state, CircuitState::Closed);

        runtime.stop().await;
        runtime.stop().await;
        assert!(!runtime.is_running());
        assert_eq!(runtime.health().status, HealthStatus::Unhealthy);

        runtime.start().await.expect("restart");
        runtime.send_message(work("m-5")).expect("send");
        wait_until(|| !sink.of_type("ack").is_empty()).await;
        runtime.stop().await;
    }

    #[tokio::test]
    async fn failed_initialization_leaves_agent_stopped() {
        let mut agent = ScriptedAgent::new(Vec::new());
        agent.fail_start = true;
        let runtime = SubagentRuntime::new(agent, fast_settings(), Arc::new(MemorySink::new()));

        let error = runtime.start().await.expect_err("start must fail");

        assert!(matches!(
            error,
            AgentError::Startup(ref message) if message.contains("policy store offline")
        ));
        assert!(!runtime.is_running());
    }

    #[tokio::test]
    async fn periodic_tasks_tick_while_running() {
        let agent = ScriptedAgent::new(Vec::new());
        let runtime = SubagentRuntime::new(agent, fast_settings(), Arc::new(MemorySink::new()));

        runtime.start().await.expect("start");
        let agent = runtime.agent().clone();
        wait_until(|| agent.ticks.load(Ordering::SeqCst) >= 2).await;
        runtime.stop().await;

        let ticks = agent.ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(agent.ticks.load(Ordering::SeqCst), ticks);
    }

    #[test]
    fn retry_delay_doubles_per_attempt() {
        let settings = RuntimeSettings {
            retry_base_delay: Duration::from_secs(1),
            ..RuntimeSettings::default()
        };

        assert_eq!(settings.retry_delay(1), Duration::from_secs(2));
        assert_eq!(settings.retry_delay(2), Duration::from_secs(4));
        assert_eq!(settings.retry_delay(3), Duration::from_secs(8));
    }
}
