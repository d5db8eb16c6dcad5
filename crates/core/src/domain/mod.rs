pub mod event;
pub mod message;
pub mod metrics;
pub mod sla;
pub mod ticket;
