use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ticket::TicketPriority;
use crate::errors::DomainError;

/// Longest response or resolution target a policy may declare.
pub const MAX_POLICY_HOURS: f64 = 24.0 * 366.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlaPolicy {
    pub priority: TicketPriority,
    pub response_time_hours: f64,
    pub resolution_time_hours: f64,
}

impl SlaPolicy {
    pub fn new(
        priority: TicketPriority,
        response_time_hours: f64,
        resolution_time_hours: f64,
    ) -> Result<Self, DomainError> {
        let policy = Self { priority, response_time_hours, resolution_time_hours };
        policy.validate()?;
        Ok(policy)
    }

    /// Targets must be finite, positive, at most [`MAX_POLICY_HOURS`], and
    /// the response target may not exceed the resolution target.
    pub fn validate(&self) -> Result<(), DomainError> {
        let priority = self.priority.as_str();
        for (name, hours) in
            [("response", self.response_time_hours), ("resolution", self.resolution_time_hours)]
        {
            if !hours.is_finite() || hours <= 0.0 || hours > MAX_POLICY_HOURS {
                return Err(DomainError::InvalidPolicy(format!(
                    "{priority} {name} target must be in (0, {MAX_POLICY_HOURS}] hours, got {hours}"
                )));
            }
        }
        if self.response_time_hours > self.resolution_time_hours {
            return Err(DomainError::InvalidPolicy(format!(
                "{priority} response target ({}h) exceeds resolution target ({}h)",
                self.response_time_hours, self.resolution_time_hours
            )));
        }
        Ok(())
    }
}

/// Priority-keyed policy table, loaded once when an agent starts.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SlaPolicySet {
    policies: HashMap<TicketPriority, SlaPolicy>,
}

impl SlaPolicySet {
    /// Builds a table, rejecting it if any policy fails [`SlaPolicy::validate`].
    pub fn new(policies: impl IntoIterator<Item = SlaPolicy>) -> Result<Self, DomainError> {
        let mut table = HashMap::new();
        for policy in policies {
            policy.validate()?;
            table.insert(policy.priority, policy);
        }
        Ok(Self { policies: table })
    }

    /// The default support table: response/resolution hours per priority.
    pub fn standard() -> Self {
        let standard = |priority, response_time_hours, resolution_time_hours| {
            (priority, SlaPolicy { priority, response_time_hours, resolution_time_hours })
        };
        Self {
            policies: HashMap::from([
                standard(TicketPriority::Critical, 1.0, 4.0),
                standard(TicketPriority::High, 4.0, 24.0),
                standard(TicketPriority::Medium, 8.0, 72.0),
                standard(TicketPriority::Low, 24.0, 168.0),
            ]),
        }
    }

    pub fn get(&self, priority: TicketPriority) -> Option<&SlaPolicy> {
        self.policies.get(&priority)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn policies(&self) -> Vec<SlaPolicy> {
        let mut policies: Vec<_> = self.policies.values().cloned().collect();
        policies.sort_by_key(|policy| policy.priority);
        policies
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaType {
    Response,
    Resolution,
}

impl SlaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Response => "response",
            Self::Resolution => "resolution",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Warning,
    Critical,
    Breach,
    Escalation,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Breach => "breach",
            Self::Escalation => "escalation",
        }
    }

    /// Topic the alert is published on. Manual escalations have no alert
    /// topic of their own.
    pub fn topic(&self) -> Option<&'static str> {
        match self {
            Self::Breach => Some(crate::topics::SLA_BREACH_ALERT),
            Self::Critical => Some(crate::topics::SLA_CRITICAL_ALERT),
            Self::Warning => Some(crate::topics::SLA_WARNING_ALERT),
            Self::Escalation => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerImpact {
    Low,
    Medium,
    High,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaAlert {
    pub ticket_id: String,
    /// `None` for manual escalations, which are not tied to a deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla_type: Option<SlaType>,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    /// Negative once the deadline has passed.
    pub time_remaining_minutes: i64,
    pub breach_duration_minutes: i64,
    pub customer_impact: CustomerImpact,
    pub escalation_required: bool,
    pub recommended_actions: Vec<String>,
    pub timestamp: DateTime<Utc>,
}
