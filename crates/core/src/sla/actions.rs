use crate::domain::sla::{AlertType, CustomerImpact};
use crate::domain::ticket::{CustomerTier, TicketPriority};

/// Advisory impact attached to alerts; never gates emission.
pub fn customer_impact(priority: TicketPriority, tier: CustomerTier) -> CustomerImpact {
    if priority == TicketPriority::Critical || tier == CustomerTier::Premium {
        CustomerImpact::High
    } else if priority == TicketPriority::High || tier == CustomerTier::Business {
        CustomerImpact::Medium
    } else {
        CustomerImpact::Low
    }
}

pub fn recommended_actions(alert_type: AlertType, impact: CustomerImpact) -> Vec<String> {
    let base: &[&str] = match alert_type {
        AlertType::Breach => &[
            "Immediately escalate to senior technician",
            "Notify customer of delay",
            "Prioritize ticket resolution",
            "Document breach reason",
        ],
        AlertType::Critical => &[
            "Assign to available technician immediately",
            "Prepare escalation if not resolved soon",
            "Review ticket complexity",
        ],
        AlertType::Warning => &[
            "Check ticket assignment status",
            "Ensure technician is aware of deadline",
            "Review progress and blockers",
        ],
        AlertType::Escalation => &[],
    };

    let mut actions: Vec<String> = base.iter().map(|action| (*action).to_string()).collect();
    if impact == CustomerImpact::High {
        actions.push("Provide proactive customer communication".to_string());
    }
    actions
}
