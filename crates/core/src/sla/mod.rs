//! SLA compliance math: deadline evaluation, alert construction and the
//! per-ticket alert cooldown.

pub mod actions;

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::domain::sla::{AlertSeverity, AlertType, CustomerImpact, SlaAlert, SlaPolicy, SlaType};
use crate::domain::ticket::{Ticket, TicketStatus};

pub use actions::{customer_impact, recommended_actions};

/// Breaches older than this many minutes are reported as critical.
pub const CRITICAL_BREACH_MINUTES: i64 = 60;

/// Fraction of the resolution target after which a warning is raised
/// regardless of the minute thresholds.
pub const RESOLUTION_WARNING_RATIO: f64 = 0.8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlaThresholds {
    pub warning_minutes: i64,
    pub critical_minutes: i64,
}

impl Default for SlaThresholds {
    fn default() -> Self {
        Self { warning_minutes: 30, critical_minutes: 10 }
    }
}

/// One SLA type's standing against its deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlaFinding {
    pub sla_type: SlaType,
    pub alert_type: AlertType,
    pub time_remaining_minutes: i64,
    pub breach_duration_minutes: i64,
}

impl SlaFinding {
    pub fn severity(&self) -> AlertSeverity {
        match self.alert_type {
            AlertType::Breach if self.breach_duration_minutes > CRITICAL_BREACH_MINUTES => {
                AlertSeverity::Critical
            }
            AlertType::Breach => AlertSeverity::High,
            AlertType::Critical => AlertSeverity::Critical,
            AlertType::Warning => AlertSeverity::Medium,
            AlertType::Escalation => AlertSeverity::High,
        }
    }

    pub fn escalation_required(&self) -> bool {
        matches!(self.alert_type, AlertType::Breach | AlertType::Critical)
    }
}

/// Evaluates a ticket against its policy and returns the alert to raise, if
/// any. Response and resolution are both evaluated; the more severe finding
/// wins and a tie goes to the response SLA. A target that cannot be turned
/// into a duration yields no finding for that SLA type.
pub fn evaluate(
    ticket: &Ticket,
    policy: &SlaPolicy,
    thresholds: &SlaThresholds,
    now: DateTime<Utc>,
) -> Option<SlaAlert> {
    let finding = assess(ticket, policy, thresholds, now)?;
    let impact = customer_impact(ticket.priority, ticket.customer_tier);

    Some(SlaAlert {
        ticket_id: ticket.id.clone(),
        sla_type: Some(finding.sla_type),
        alert_type: finding.alert_type,
        severity: finding.severity(),
        time_remaining_minutes: finding.time_remaining_minutes,
        breach_duration_minutes: finding.breach_duration_minutes,
        customer_impact: impact,
        escalation_required: finding.escalation_required(),
        recommended_actions: recommended_actions(finding.alert_type, impact),
        timestamp: now,
    })
}

pub fn assess(
    ticket: &Ticket,
    policy: &SlaPolicy,
    thresholds: &SlaThresholds,
    now: DateTime<Utc>,
) -> Option<SlaFinding> {
    if ticket.status.is_terminal() {
        return None;
    }

    let elapsed = now - ticket.created_at;
    let response = if ticket.status == TicketStatus::Open {
        check_deadline(SlaType::Response, elapsed, policy.response_time_hours, thresholds, false)
    } else {
        None
    };
    let resolution = check_deadline(
        SlaType::Resolution,
        elapsed,
        policy.resolution_time_hours,
        thresholds,
        true,
    );

    match (response, resolution) {
        (Some(response), Some(resolution))
            if rank(resolution.alert_type) > rank(response.alert_type) =>
        {
            Some(resolution)
        }
        (Some(response), _) => Some(response),
        (None, resolution) => resolution,
    }
}

fn check_deadline(
    sla_type: SlaType,
    elapsed: Duration,
    target_hours: f64,
    thresholds: &SlaThresholds,
    warn_on_ratio: bool,
) -> Option<SlaFinding> {
    let target = hours(target_hours)?;
    let remaining = target.checked_sub(&elapsed)?;
    let time_remaining_minutes = remaining.num_minutes();
    let past_warning_ratio = warn_on_ratio
        && hours(target_hours * RESOLUTION_WARNING_RATIO).is_some_and(|mark| elapsed > mark);

    let alert_type = if elapsed > target {
        AlertType::Breach
    } else if time_remaining_minutes <= thresholds.critical_minutes {
        AlertType::Critical
    } else if time_remaining_minutes <= thresholds.warning_minutes || past_warning_ratio {
        AlertType::Warning
    } else {
        return None;
    };

    let breach_duration_minutes =
        if alert_type == AlertType::Breach { -time_remaining_minutes } else { 0 };

    Some(SlaFinding { sla_type, alert_type, time_remaining_minutes, breach_duration_minutes })
}

/// `None` for targets that are not a positive, representable duration.
fn hours(value: f64) -> Option<Duration> {
    let millis = (value * 3_600_000.0).round();
    if !millis.is_finite() || millis <= 0.0 || millis >= i64::MAX as f64 {
        return None;
    }
    Duration::try_milliseconds(millis as i64)
}

fn rank(alert_type: AlertType) -> u8 {
    match alert_type {
        AlertType::Warning => 1,
        AlertType::Critical => 2,
        AlertType::Breach | AlertType::Escalation => 3,
    }
}

/// Alert built for an operator-requested escalation.
pub fn manual_escalation(ticket_id: impl Into<String>, now: DateTime<Utc>) -> SlaAlert {
    SlaAlert {
        ticket_id: ticket_id.into(),
        sla_type: None,
        alert_type: AlertType::Escalation,
        severity: AlertSeverity::High,
        time_remaining_minutes: 0,
        breach_duration_minutes: 0,
        customer_impact: CustomerImpact::Medium,
        escalation_required: true,
        recommended_actions: Vec::new(),
        timestamp: now,
    }
}

/// Last alert per ticket. A new alert for a ticket replaces the cached one,
/// and is suppressed while the previous one is younger than the cooldown.
#[derive(Clone, Debug)]
pub struct AlertCache {
    cooldown: Duration,
    alerts: HashMap<String, SlaAlert>,
}

impl AlertCache {
    pub fn new(cooldown: std::time::Duration) -> Self {
        let cooldown = Duration::from_std(cooldown).unwrap_or_else(|_| Duration::minutes(5));
        Self { cooldown, alerts: HashMap::new() }
    }

    pub fn in_cooldown(&self, ticket_id: &str, now: DateTime<Utc>) -> bool {
        self.alerts.get(ticket_id).is_some_and(|alert| now - alert.timestamp < self.cooldown)
    }

    pub fn record(&mut self, alert: SlaAlert) {
        self.alerts.insert(alert.ticket_id.clone(), alert);
    }

    pub fn clear(&mut self, ticket_id: &str) -> Option<SlaAlert> {
        self.alerts.remove(ticket_id)
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    /// Snapshot ordered by ticket id.
    pub fn alerts(&self) -> Vec<SlaAlert> {
        let mut alerts: Vec<_> = self.alerts.values().cloned().collect();
        alerts.sort_by(|left, right| left.ticket_id.cmp(&right.ticket_id));
        alerts
    }
}
