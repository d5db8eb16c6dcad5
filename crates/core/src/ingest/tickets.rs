use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::domain::event::Event;
use crate::domain::message::Payload;
use crate::domain::ticket::{CustomerTier, MonitoredTicket, TicketPriority, TicketStatus};
use crate::ingest::dedup::eviction_batch;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TicketCacheError {
    #[error("ticket `{ticket_id}` has invalid created_at `{value}`")]
    InvalidTimestamp { ticket_id: String, value: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TicketChange {
    Created,
    Updated,
}

/// Bounded cache of tickets seen through ingestion, in first-sighting order.
///
/// When over capacity, a tenth of the entries is evicted: resolved or
/// closed tickets go first, then the oldest live ones.
#[derive(Clone, Debug)]
pub struct TicketCache {
    capacity: usize,
    order: VecDeque<String>,
    tickets: HashMap<String, MonitoredTicket>,
}

impl TicketCache {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), order: VecDeque::new(), tickets: HashMap::new() }
    }

    /// Applies a ticket event. Events without a `ticket_id` are ignored.
    ///
    /// A first sighting takes `priority`, `status`, `customer_tier` and
    /// `created_at` from the event (defaulting creation to `now`); later
    /// events update status from `new_status` or `status`, plus priority and
    /// tier when present.
    pub fn apply(
        &mut self,
        event: &Event,
        now: DateTime<Utc>,
    ) -> Result<Option<(TicketChange, MonitoredTicket)>, TicketCacheError> {
        let Some(ticket_id) = event.ticket_id() else {
            return Ok(None);
        };
        let data = &event.data;

        if let Some(ticket) = self.tickets.get_mut(ticket_id) {
            let status =
                string_field(data, "new_status").or_else(|| string_field(data, "status"));
            if let Some(status) = status {
                ticket.status = TicketStatus::parse(status);
            }
            if let Some(priority) = string_field(data, "priority") {
                ticket.priority = TicketPriority::parse(priority);
            }
            if let Some(tier) = customer_tier(data) {
                ticket.customer_tier = tier;
            }
            ticket.last_updated = now;
            ticket.update_count += 1;
            return Ok(Some((TicketChange::Updated, ticket.clone())));
        }

        let created_at = match string_field(data, "created_at") {
            Some(value) => DateTime::parse_from_rfc3339(value)
                .map(|parsed| parsed.with_timezone(&Utc))
                .map_err(|_| TicketCacheError::InvalidTimestamp {
                    ticket_id: ticket_id.to_string(),
                    value: value.to_string(),
                })?,
            None => now,
        };

        let ticket = MonitoredTicket {
            ticket_id: ticket_id.to_string(),
            priority: string_field(data, "priority").map(TicketPriority::parse).unwrap_or_default(),
            status: string_field(data, "status").map(TicketStatus::parse).unwrap_or_default(),
            customer_tier: customer_tier(data).unwrap_or_default(),
            created_at,
            last_updated: now,
            update_count: 1,
        };

        self.order.push_back(ticket.ticket_id.clone());
        self.tickets.insert(ticket.ticket_id.clone(), ticket.clone());
        if self.tickets.len() > self.capacity {
            self.evict(eviction_batch(self.capacity));
        }
        Ok(Some((TicketChange::Created, ticket)))
    }

    pub fn get(&self, ticket_id: &str) -> Option<&MonitoredTicket> {
        self.tickets.get(ticket_id)
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    /// Tickets that are not yet resolved or closed, in first-sighting order.
    pub fn active(&self) -> Vec<MonitoredTicket> {
        self.order
            .iter()
            .filter_map(|id| self.tickets.get(id))
            .filter(|ticket| !ticket.status.is_terminal())
            .cloned()
            .collect()
    }

    fn evict(&mut self, count: usize) {
        let mut victims: HashSet<String> = self
            .order
            .iter()
            .filter(|id| self.tickets.get(*id).is_some_and(|ticket| ticket.status.is_terminal()))
            .take(count)
            .cloned()
            .collect();
        if victims.len() < count {
            let remaining = count - victims.len();
            let live: Vec<String> = self
                .order
                .iter()
                .filter(|id| !victims.contains(*id))
                .take(remaining)
                .cloned()
                .collect();
            victims.extend(live);
        }

        for id in &victims {
            self.tickets.remove(id);
        }
        self.order.retain(|id| !victims.contains(id));
    }
}

fn string_field<'a>(data: &'a Payload, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str).filter(|value| !value.trim().is_empty())
}

// Accepts a flat `customer_tier` or a nested `customer.tier`.
fn customer_tier(data: &Payload) -> Option<CustomerTier> {
    string_field(data, "customer_tier")
        .or_else(|| {
            data.get("customer")
                .and_then(Value::as_object)
                .and_then(|customer| string_field(customer, "tier"))
        })
        .map(CustomerTier::parse)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    use super::{TicketCache, TicketCacheError, TicketChange};
    use crate::domain::event::{Event, EventSource};
    use crate::domain::message::payload_from;
    use crate::domain::ticket::{CustomerTier, TicketPriority, TicketStatus};

    fn event(id: &str, data: serde_json::Value) -> Event {
        Event::new(id, "ticket_created", EventSource::Webhook, payload_from(&data))
    }

    #[test]
    fn first_sighting_creates_then_updates_status() {
        let mut cache = TicketCache::new(10);
        let now = Utc::now();

        let created = cache
            .apply(
                &event("e1", json!({
                    "ticket_id": "T1",
                    "priority": "critical",
                    "created_at": "2026-03-01T08:00:00Z",
                    "customer": { "tier": "premium" }
                })),
                now,
            )
            .expect("valid event")
            .expect("ticket event");
        assert_eq!(created.0, TicketChange::Created);
        assert_eq!(created.1.priority, TicketPriority::Critical);
        assert_eq!(created.1.status, TicketStatus::Open);
        assert_eq!(created.1.customer_tier, CustomerTier::Premium);
        assert_eq!(created.1.created_at, Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap());

        let later = now + Duration::minutes(3);
        let (change, ticket) = cache
            .apply(&event("e2", json!({ "ticket_id": "T1", "new_status": "in progress" })), later)
            .expect("valid event")
            .expect("ticket event");
        assert_eq!(change, TicketChange::Updated);
        assert_eq!(ticket.status, TicketStatus::InProgress);
        assert_eq!(ticket.priority, TicketPriority::Critical);
        assert_eq!(ticket.last_updated, later);
        assert_eq!(ticket.update_count, 2);
    }

    #[test]
    fn events_without_ticket_id_are_ignored() {
        let mut cache = TicketCache::new(10);
        let applied = cache.apply(&event("e1", json!({ "status": "open" })), Utc::now());
        assert_eq!(applied, Ok(None));
        assert!(cache.is_empty());
    }

    #[test]
    fn invalid_created_at_is_rejected() {
        let mut cache = TicketCache::new(10);
        let error = cache
            .apply(
                &event("e1", json!({ "ticket_id": "T1", "created_at": "yesterday" })),
                Utc::now(),
            )
            .expect_err("timestamp is not RFC 3339");
        assert_eq!(
            error,
            TicketCacheError::InvalidTimestamp {
                ticket_id: "T1".to_string(),
                value: "yesterday".to_string()
            }
        );
        assert!(cache.get("T1").is_none());
    }

    #[test]
    fn eviction_prefers_terminal_tickets() {
        let mut cache = TicketCache::new(3);
        let now = Utc::now();
        for (id, status) in [("T1", "open"), ("T2", "closed"), ("T3", "open")] {
            cache
                .apply(&event(id, json!({ "ticket_id": id, "status": status })), now)
                .expect("valid event");
        }
        cache.apply(&event("T4", json!({ "ticket_id": "T4" })), now).expect("valid event");

        assert_eq!(cache.len(), 3);
        assert!(cache.get("T2").is_none());
        assert!(cache.get("T1").is_some());
        let active: Vec<_> = cache.active().into_iter().map(|ticket| ticket.ticket_id).collect();
        assert_eq!(active, vec!["T1", "T3", "T4"]);
    }

    #[test]
    fn eviction_falls_back_to_oldest_live_ticket() {
        let mut cache = TicketCache::new(2);
        let now = Utc::now();
        for id in ["T1", "T2", "T3"] {
            cache.apply(&event(id, json!({ "ticket_id": id })), now).expect("valid event");
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get("T1").is_none());
    }

    #[test]
    fn bulk_eviction_of_a_large_cache_drops_a_tenth_terminal_first() {
        let mut cache = TicketCache::new(5_000);
        let now = Utc::now();
        for n in 0..5_000 {
            let id = format!("T{n}");
            let status = if n % 1_000 == 0 { "resolved" } else { "open" };
            cache
                .apply(&event(&id, json!({ "ticket_id": id, "status": status })), now)
                .expect("valid event");
        }
        cache.apply(&event("T-new", json!({ "ticket_id": "T-new" })), now).expect("valid event");

        // 500 evicted: the 5 resolved tickets plus the 495 oldest open ones (T1..=T495).
        assert_eq!(cache.len(), 4_501);
        for n in [0, 1_000, 2_000, 3_000, 4_000] {
            assert!(cache.get(&format!("T{n}")).is_none());
        }
        assert!(cache.get("T1").is_none());
        assert!(cache.get("T495").is_none());
        assert!(cache.get("T496").is_some());
        assert!(cache.get("T-new").is_some());
        let active = cache.active();
        assert_eq!(active.len(), 4_501);
        assert_eq!(active[0].ticket_id, "T496");
    }
}
