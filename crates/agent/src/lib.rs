//! Agent runtime for the SLA monitoring service
//!
//! This crate hosts the long-running subagents and the plumbing they share:
//! - A mailbox-driven processing loop with retry, circuit breaking and
//!   rate limiting (`runtime`)
//! - Publication sinks, including the in-process topic broker (`sink`)
//! - Capability traits for the ticketing platform, policy store and
//!   escalation service (`collaborators`)
//!
//! # Agents
//!
//! - `EventIngestionAgent` - webhook/poll intake, dedup, partitioned
//!   processing and the ticket cache (see `ingestion`)
//! - `SlaMonitorAgent` - periodic SLA sweeps, alert cooldown and
//!   escalation (see `sla_monitor`)
//!
//! Agents never talk to each other directly. Everything crosses a
//! `MessageSink`, so the broker can be swapped for a real bus without
//! touching agent code.

pub mod collaborators;
pub mod error;
pub mod ingestion;
pub mod runtime;
pub mod sink;
pub mod sla_monitor;

pub use error::AgentError;
pub use ingestion::{EventIngestionAgent, InboundAck, IngestionSettings, IngestionStatus};
pub use runtime::{
    AgentContext, AgentHealth, AgentStatus, HealthStatus, Mailbox, PeriodicTask, RuntimeSettings,
    Subagent, SubagentRuntime,
};
pub use sink::{LocalBroker, MemorySink, MessageSink, TracingSink};
pub use sla_monitor::{SlaMetrics, SlaMonitorAgent, SlaMonitorSettings};
