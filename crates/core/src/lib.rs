pub mod config;
pub mod domain;
pub mod errors;
pub mod ingest;
pub mod resilience;
pub mod signature;
pub mod sla;
pub mod topics;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use domain::event::{Event, EventSource};
pub use domain::message::{payload_from, AgentMessage, Payload};
pub use domain::metrics::{MetricsRecorder, MetricsSnapshot};
pub use domain::sla::{
    AlertSeverity, AlertType, CustomerImpact, SlaAlert, SlaPolicy, SlaPolicySet, SlaType,
};
pub use domain::ticket::{CustomerTier, MonitoredTicket, Ticket, TicketPriority, TicketStatus};
pub use errors::{ApplicationError, CollaboratorError, DomainError, InterfaceError};
pub use ingest::{SeenSet, TicketCache, TicketCacheError, TicketChange};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState, RateLimiter,
    RateLimiterConfig,
};
pub use signature::SignatureError;
pub use sla::{AlertCache, SlaThresholds};
