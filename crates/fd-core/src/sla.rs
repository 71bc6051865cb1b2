//! Service-level breach timers for tickets and bookings.
//!
//! SLA state is derived on read from a breach point, the record's terminal
//! flag and its completion time. Nothing here is persisted.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::TicketPriority;

string_enum! {
    /// How close an active item is to its breach point.
    pub enum UrgencyTier {
        Normal => "normal",
        /// Less than four hours left.
        Warning => "warning",
        /// Less than one hour left.
        Critical => "critical",
    }
}

/// Outcome of evaluating an item against its breach point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaState {
    /// Finished on or before the breach point.
    Met,
    /// Past the breach point, whether still open or finished late.
    Breached { overdue: Duration },
    /// Terminal but with no completion time, so no verdict is possible.
    Closed,
    Active { remaining: Duration, tier: UrgencyTier },
}

const CRITICAL_THRESHOLD_HOURS: i64 = 1;
const WARNING_THRESHOLD_HOURS: i64 = 4;

/// Classifies an item.
///
/// `remaining == 0` is still active and critical; only a negative remainder
/// counts as breached.
pub fn evaluate(
    breach_at: DateTime<Utc>,
    terminal: bool,
    completed_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> SlaState {
    if terminal {
        return match completed_at {
            Some(done) if done <= breach_at => SlaState::Met,
            Some(done) => SlaState::Breached {
                overdue: done - breach_at,
            },
            None => SlaState::Closed,
        };
    }

    let remaining = breach_at - now;
    if remaining < Duration::zero() {
        return SlaState::Breached { overdue: -remaining };
    }

    let tier = if remaining < Duration::hours(CRITICAL_THRESHOLD_HOURS) {
        UrgencyTier::Critical
    } else if remaining < Duration::hours(WARNING_THRESHOLD_HOURS) {
        UrgencyTier::Warning
    } else {
        UrgencyTier::Normal
    };

    SlaState::Active { remaining, tier }
}

impl SlaState {
    pub fn is_breached(&self) -> bool {
        matches!(self, SlaState::Breached { .. })
    }

    pub fn label(&self) -> String {
        match self {
            SlaState::Met => "SLA met".to_string(),
            SlaState::Closed => "Closed".to_string(),
            SlaState::Breached { overdue } => format!("Breached by {}", format_duration(*overdue)),
            SlaState::Active { remaining, .. } => format!("{} left", format_duration(*remaining)),
        }
    }

    /// CSS class used by the badge template.
    pub fn css_class(&self) -> &'static str {
        match self {
            SlaState::Met => "sla-met",
            SlaState::Closed => "sla-closed",
            SlaState::Breached { .. } => "sla-breached",
            SlaState::Active { tier, .. } => match tier {
                UrgencyTier::Critical => "sla-critical",
                UrgencyTier::Warning => "sla-warning",
                UrgencyTier::Normal => "sla-normal",
            },
        }
    }

    pub fn summary(&self, breach_at: DateTime<Utc>) -> SlaSummary {
        let (state, tier, remaining, overdue) = match self {
            SlaState::Met => ("met", None, None, None),
            SlaState::Closed => ("closed", None, None, None),
            SlaState::Breached { overdue } => ("breached", None, None, Some(overdue.num_seconds())),
            SlaState::Active { remaining, tier } => {
                ("active", Some(*tier), Some(remaining.num_seconds()), None)
            }
        };
        SlaSummary {
            state,
            tier,
            breach_at,
            remaining_seconds: remaining,
            overdue_seconds: overdue,
            label: self.label(),
            css_class: self.css_class(),
        }
    }
}

/// Serialisable view of an [`SlaState`] for API responses and templates.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SlaSummary {
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<UrgencyTier>,
    pub breach_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overdue_seconds: Option<i64>,
    pub label: String,
    pub css_class: &'static str,
}

/// Human duration such as `2d 3h`, `3h 20m` or `45m`.
pub fn format_duration(d: Duration) -> String {
    let total_minutes = d.num_minutes().abs();
    let days = total_minutes / (24 * 60);
    let hours = (total_minutes / 60) % 24;
    let minutes = total_minutes % 60;

    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m", minutes)
    } else {
        "<1m".to_string()
    }
}

/// Resolution windows per ticket priority, in hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaPolicy {
    pub critical_hours: i64,
    pub high_hours: i64,
    pub medium_hours: i64,
    pub low_hours: i64,
}

impl Default for SlaPolicy {
    fn default() -> Self {
        Self {
            critical_hours: 4,
            high_hours: 8,
            medium_hours: 24,
            low_hours: 72,
        }
    }
}

impl SlaPolicy {
    pub fn window(&self, priority: TicketPriority) -> Duration {
        let hours = match priority {
            TicketPriority::Critical => self.critical_hours,
            TicketPriority::High => self.high_hours,
            TicketPriority::Medium => self.medium_hours,
            TicketPriority::Low => self.low_hours,
        };
        Duration::hours(hours)
    }

    /// Breach point for a ticket opened at `created_at`. A positive
    /// `override_hours` (from a service item) replaces the priority window.
    pub fn breach_at(
        &self,
        priority: TicketPriority,
        created_at: DateTime<Utc>,
        override_hours: Option<i32>,
    ) -> DateTime<Utc> {
        let window = match override_hours {
            Some(h) if h > 0 => Duration::hours(i64::from(h)),
            _ => self.window(priority),
        };
        created_at + window
    }

    pub fn validate(&self) -> Result<(), String> {
        let all = [
            ("critical_hours", self.critical_hours),
            ("high_hours", self.high_hours),
            ("medium_hours", self.medium_hours),
            ("low_hours", self.low_hours),
        ];
        for (name, hours) in all {
            if hours <= 0 {
                return Err(format!("sla.{name} must be positive, got {hours}"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_open_past_breach_is_breached() {
        let breach = t0();
        let now = breach + Duration::minutes(90);
        match evaluate(breach, false, None, now) {
            SlaState::Breached { overdue } => assert_eq!(overdue, Duration::minutes(90)),
            other => panic!("expected breached, got {other:?}"),
        }
    }

    #[test]
    fn test_thirty_minutes_left_is_critical() {
        let now = t0();
        let state = evaluate(now + Duration::minutes(30), false, None, now);
        assert_eq!(
            state,
            SlaState::Active {
                remaining: Duration::minutes(30),
                tier: UrgencyTier::Critical
            }
        );
        assert_eq!(state.css_class(), "sla-critical");
        assert_eq!(state.label(), "30m left");
    }

    #[test]
    fn test_tier_boundaries() {
        let now = t0();
        let tier = |mins| match evaluate(now + Duration::minutes(mins), false, None, now) {
            SlaState::Active { tier, .. } => tier,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(tier(0), UrgencyTier::Critical);
        assert_eq!(tier(59), UrgencyTier::Critical);
        assert_eq!(tier(60), UrgencyTier::Warning);
        assert_eq!(tier(239), UrgencyTier::Warning);
        assert_eq!(tier(240), UrgencyTier::Normal);
    }

    #[test]
    fn test_completed_after_breach_is_breached() {
        let breach = t0();
        let state = evaluate(breach, true, Some(breach + Duration::hours(2)), breach);
        assert_eq!(
            state,
            SlaState::Breached {
                overdue: Duration::hours(2)
            }
        );
    }

    #[test]
    fn test_completed_on_time_is_met() {
        let breach = t0();
        let later = breach + Duration::days(3);
        assert_eq!(evaluate(breach, true, Some(breach), later), SlaState::Met);
        assert_eq!(
            evaluate(breach, true, Some(breach - Duration::hours(1)), later),
            SlaState::Met
        );
    }

    #[test]
    fn test_terminal_without_completion_is_closed() {
        let breach = t0();
        let state = evaluate(breach, true, None, breach + Duration::days(1));
        assert_eq!(state, SlaState::Closed);
        assert!(!state.is_breached());
    }

    #[test]
    fn test_policy_windows_and_override() {
        let policy = SlaPolicy::default();
        let created = t0();
        assert_eq!(
            policy.breach_at(TicketPriority::Critical, created, None),
            created + Duration::hours(4)
        );
        assert_eq!(
            policy.breach_at(TicketPriority::Low, created, None),
            created + Duration::hours(72)
        );
        assert_eq!(
            policy.breach_at(TicketPriority::Low, created, Some(2)),
            created + Duration::hours(2)
        );
        assert_eq!(
            policy.breach_at(TicketPriority::High, created, Some(0)),
            created + Duration::hours(8)
        );
    }

    #[test]
    fn test_policy_validation() {
        assert!(SlaPolicy::default().validate().is_ok());
        let bad = SlaPolicy {
            high_hours: 0,
            ..SlaPolicy::default()
        };
        assert!(bad.validate().unwrap_err().contains("high_hours"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::seconds(20)), "<1m");
        assert_eq!(format_duration(Duration::minutes(45)), "45m");
        assert_eq!(format_duration(Duration::minutes(200)), "3h 20m");
        assert_eq!(format_duration(Duration::hours(51)), "2d 3h");
    }

    #[test]
    fn test_summary_serialization() {
        let breach = t0();
        let summary = evaluate(breach, false, None, breach + Duration::hours(1)).summary(breach);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["state"], "breached");
        assert_eq!(json["overdue_seconds"], 3600);
        assert_eq!(json["css_class"], "sla-breached");
        assert!(json.get("tier").is_none());
    }
}
