use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TicketPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl TicketPriority {
    pub const ALL: [Self; 4] = [Self::Critical, Self::High, Self::Medium, Self::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Lenient parse: unknown priorities are treated as `medium`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "critical" | "urgent" => Self::Critical,
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Medium,
        }
    }
}

impl Default for TicketPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl From<String> for TicketPriority {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<TicketPriority> for String {
    fn from(value: TicketPriority) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TicketStatus {
    Open,
    InProgress,
    Pending,
    Resolved,
    Closed,
    Other(String),
}

impl TicketStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
            Self::Other(value) => value.as_str(),
        }
    }

    pub fn parse(value: &str) -> Self {
        let normalized = value.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "open" | "new" => Self::Open,
            "in_progress" => Self::InProgress,
            "pending" | "on_hold" => Self::Pending,
            "resolved" => Self::Resolved,
            "closed" => Self::Closed,
            _ => Self::Other(normalized),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Closed)
    }
}

impl Default for TicketStatus {
    fn default() -> Self {
        Self::Open
    }
}

impl From<String> for TicketStatus {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<TicketStatus> for String {
    fn from(value: TicketStatus) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CustomerTier {
    Premium,
    Business,
    Standard,
}

impl CustomerTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Premium => "premium",
            Self::Business => "business",
            Self::Standard => "standard",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "premium" | "enterprise" => Self::Premium,
            "business" => Self::Business,
            _ => Self::Standard,
        }
    }
}

impl Default for CustomerTier {
    fn default() -> Self {
        Self::Standard
    }
}

impl From<String> for CustomerTier {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<CustomerTier> for String {
    fn from(value: CustomerTier) -> Self {
        value.as_str().to_string()
    }
}

/// Ticket as reported by the ticketing platform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    #[serde(default)]
    pub priority: TicketPriority,
    #[serde(default)]
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub customer_tier: CustomerTier,
}

/// Cached view of a ticket, built from ingested events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredTicket {
    pub ticket_id: String,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub customer_tier: CustomerTier,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub update_count: u64,
}

impl MonitoredTicket {
    pub fn to_ticket(&self) -> Ticket {
        Ticket {
            id: self.ticket_id.clone(),
            priority: self.priority,
            status: self.status.clone(),
            created_at: self.created_at,
            customer_tier: self.customer_tier,
        }
    }
}
