use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sla::{self, SlaState};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub location_id: Option<Uuid>,
    pub capacity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Room {
    pub fn new(name: impl Into<String>, capacity: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            location_id: None,
            capacity,
            created_at: now,
            updated_at: now,
        }
    }
}

string_enum! {
    pub enum BookingStatus {
        Pending => "pending",
        Confirmed => "confirmed",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

impl BookingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    /// Statuses that hold the room.
    pub fn blocks_room(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: Uuid,
    pub room_id: Uuid,
    pub organizer_id: Uuid,
    pub title: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub status: BookingStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn new(
        room_id: Uuid,
        organizer_id: Uuid,
        title: impl Into<String>,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            room_id,
            organizer_id,
            title: title.into(),
            start_at,
            end_at,
            status: BookingStatus::Confirmed,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Half-open interval overlap: back-to-back bookings do not collide.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_at < end && start < self.end_at
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), String> {
        if self.status.is_terminal() {
            return Err(format!("cannot cancel a booking that is {}", self.status));
        }
        self.status = BookingStatus::Cancelled;
        self.updated_at = now;
        Ok(())
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), String> {
        if self.status.is_terminal() {
            return Err(format!("cannot complete a booking that is {}", self.status));
        }
        self.status = BookingStatus::Completed;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// The breach point of a booking is its start time.
    pub fn sla_state(&self, now: DateTime<Utc>) -> SlaState {
        sla::evaluate(self.start_at, self.status.is_terminal(), self.completed_at, now)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BookingFilter {
    pub room_id: Option<Uuid>,
    pub organizer_id: Option<Uuid>,
    pub status: Option<BookingStatus>,
    /// Bookings ending after this instant.
    pub from: Option<DateTime<Utc>>,
    /// Bookings starting before this instant.
    pub until: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_overlap_is_half_open() {
        let start = Utc.with_ymd_and_hms(2024, 5, 6, 10, 0, 0).unwrap();
        let b = Booking::new(Uuid::new_v4(), Uuid::new_v4(), "Standup", start, start + Duration::hours(1));

        assert!(b.overlaps(start + Duration::minutes(30), start + Duration::hours(2)));
        assert!(b.overlaps(start - Duration::hours(1), start + Duration::minutes(1)));
        assert!(!b.overlaps(start + Duration::hours(1), start + Duration::hours(2)));
        assert!(!b.overlaps(start - Duration::hours(1), start));
    }

    #[test]
    fn test_booking_sla_uses_start() {
        let start = Utc.with_ymd_and_hms(2024, 5, 6, 10, 0, 0).unwrap();
        let mut b = Booking::new(Uuid::new_v4(), Uuid::new_v4(), "Review", start, start + Duration::hours(1));

        assert!(b.sla_state(start + Duration::minutes(5)).is_breached());

        b.status = BookingStatus::Completed;
        b.completed_at = Some(start - Duration::minutes(1));
        assert_eq!(b.sla_state(start + Duration::hours(3)), SlaState::Met);
    }

    #[test]
    fn test_terminal_bookings_cannot_change() {
        let start = Utc.with_ymd_and_hms(2024, 5, 6, 10, 0, 0).unwrap();
        let mut b = Booking::new(Uuid::new_v4(), Uuid::new_v4(), "1:1", start, start + Duration::hours(1));

        b.complete(start + Duration::minutes(50)).unwrap();
        assert_eq!(b.completed_at, Some(start + Duration::minutes(50)));
        assert!(b.cancel(start + Duration::hours(2)).is_err());
        assert!(b.complete(start + Duration::hours(2)).is_err());
    }
}
