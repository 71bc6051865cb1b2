use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sla::{self, SlaPolicy, SlaState};

string_enum! {
    pub enum TicketPriority {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

string_enum! {
    pub enum TicketStatus {
        Open => "open",
        InProgress => "in_progress",
        OnHold => "on_hold",
        Resolved => "resolved",
        Closed => "closed",
        Cancelled => "cancelled",
        Completed => "completed",
    }
}

string_enum! {
    /// Where a ticket came from.
    pub enum TicketSource {
        Helpdesk => "helpdesk",
        Portal => "portal",
        Maintenance => "maintenance",
        Agent => "agent",
    }
}

impl TicketStatus {
    pub const TERMINAL: [TicketStatus; 4] = [
        TicketStatus::Resolved,
        TicketStatus::Closed,
        TicketStatus::Cancelled,
        TicketStatus::Completed,
    ];

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }
}

/// A helpdesk ticket or portal service request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticket {
    pub id: Uuid,
    /// Sequential number assigned by the repository on insert.
    pub number: i64,
    pub title: String,
    pub description: Option<String>,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub source: TicketSource,
    pub requester_id: Option<Uuid>,
    pub assignee_id: Option<Uuid>,
    pub asset_id: Option<Uuid>,
    pub service_item_id: Option<Uuid>,
    pub sla_breach_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    pub fn new(title: impl Into<String>, priority: TicketPriority, source: TicketSource) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            number: 0,
            title: title.into(),
            description: None,
            priority,
            status: TicketStatus::Open,
            source,
            requester_id: None,
            assignee_id: None,
            asset_id: None,
            service_item_id: None,
            sla_breach_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Human reference such as `TCK-000123`.
    pub fn reference(&self) -> String {
        format!("TCK-{:06}", self.number)
    }

    /// Sets the breach point from the policy and an optional item override.
    pub fn apply_sla(&mut self, policy: &SlaPolicy, override_hours: Option<i32>) {
        self.sla_breach_at = Some(policy.breach_at(self.priority, self.created_at, override_hours));
    }

    /// Moves to `status`, stamping `completed_at` on entering a terminal
    /// status and clearing it when re-opened.
    pub fn transition(&mut self, status: TicketStatus, now: DateTime<Utc>) {
        let was_terminal = self.status.is_terminal();
        self.status = status;
        if status.is_terminal() {
            if !was_terminal || self.completed_at.is_none() {
                self.completed_at = Some(now);
            }
        } else {
            self.completed_at = None;
        }
        self.updated_at = now;
    }

    pub fn sla_state(&self, now: DateTime<Utc>) -> Option<SlaState> {
        self.sla_breach_at
            .map(|breach| sla::evaluate(breach, self.status.is_terminal(), self.completed_at, now))
    }
}

#[derive(Debug, Clone, Default)]
pub struct TicketFilter {
    pub status: Option<TicketStatus>,
    pub priority: Option<TicketPriority>,
    pub assignee_id: Option<Uuid>,
    pub requester_id: Option<Uuid>,
    pub source: Option<TicketSource>,
    /// Only tickets whose SLA is breached as of `now`.
    pub breached_only: bool,
    /// Only non-terminal tickets.
    pub open_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_reference_format() {
        let mut t = Ticket::new("Printer jam", TicketPriority::Low, TicketSource::Helpdesk);
        t.number = 123;
        assert_eq!(t.reference(), "TCK-000123");
    }

    #[test]
    fn test_transition_stamps_and_clears_completion() {
        let mut t = Ticket::new("VPN down", TicketPriority::High, TicketSource::Portal);
        let now = Utc::now();

        t.transition(TicketStatus::InProgress, now);
        assert!(t.completed_at.is_none());

        t.transition(TicketStatus::Resolved, now);
        assert_eq!(t.completed_at, Some(now));

        let later = now + Duration::hours(1);
        t.transition(TicketStatus::Closed, later);
        assert_eq!(t.completed_at, Some(now), "terminal to terminal keeps the stamp");

        t.transition(TicketStatus::Open, later);
        assert!(t.completed_at.is_none());
    }

    #[test]
    fn test_sla_applied_from_policy() {
        let mut t = Ticket::new("Laptop broken", TicketPriority::Critical, TicketSource::Helpdesk);
        t.apply_sla(&SlaPolicy::default(), None);
        assert_eq!(t.sla_breach_at, Some(t.created_at + Duration::hours(4)));

        let state = t.sla_state(t.created_at).unwrap();
        assert!(!state.is_breached());
        assert!(t
            .sla_state(t.created_at + Duration::hours(5))
            .unwrap()
            .is_breached());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TicketStatus::Cancelled.is_terminal());
        assert!(TicketStatus::Completed.is_terminal());
        assert!(!TicketStatus::OnHold.is_terminal());
    }
}
