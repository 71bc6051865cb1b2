use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

string_enum! {
    pub enum VisitStatus {
        Expected => "expected",
        CheckedIn => "checked_in",
        CheckedOut => "checked_out",
        Cancelled => "cancelled",
    }
}

/// A registered visit by an external guest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Visit {
    pub id: Uuid,
    pub visitor_name: String,
    pub company: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub host_employee_id: Uuid,
    pub purpose: Option<String>,
    pub badge_number: Option<String>,
    pub expected_at: DateTime<Utc>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub checked_out_at: Option<DateTime<Utc>>,
    pub status: VisitStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Visit {
    pub fn new(visitor_name: impl Into<String>, host_employee_id: Uuid, expected_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            visitor_name: visitor_name.into(),
            company: None,
            email: None,
            phone: None,
            host_employee_id,
            purpose: None,
            badge_number: None,
            expected_at,
            checked_in_at: None,
            checked_out_at: None,
            status: VisitStatus::Expected,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn check_in(&mut self, badge_number: Option<String>, now: DateTime<Utc>) -> Result<(), String> {
        if self.status != VisitStatus::Expected {
            return Err(format!("cannot check in a visit that is {}", self.status));
        }
        self.status = VisitStatus::CheckedIn;
        self.checked_in_at = Some(now);
        if badge_number.is_some() {
            self.badge_number = badge_number;
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn check_out(&mut self, now: DateTime<Utc>) -> Result<(), String> {
        if self.status != VisitStatus::CheckedIn {
            return Err(format!("cannot check out a visit that is {}", self.status));
        }
        self.status = VisitStatus::CheckedOut;
        self.checked_out_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), String> {
        if self.status != VisitStatus::Expected {
            return Err(format!("cannot cancel a visit that is {}", self.status));
        }
        self.status = VisitStatus::Cancelled;
        self.updated_at = now;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct VisitFilter {
    pub status: Option<VisitStatus>,
    /// Visits expected on this UTC day.
    pub date: Option<NaiveDate>,
    pub host_employee_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visit_lifecycle() {
        let now = Utc::now();
        let mut v = Visit::new("Grace Hopper", Uuid::new_v4(), now);

        assert!(v.check_out(now).is_err());
        v.check_in(Some("B-12".into()), now).unwrap();
        assert_eq!(v.status, VisitStatus::CheckedIn);
        assert_eq!(v.badge_number.as_deref(), Some("B-12"));
        assert!(v.check_in(None, now).is_err());
        assert!(v.cancel(now).is_err());

        v.check_out(now).unwrap();
        assert_eq!(v.status, VisitStatus::CheckedOut);
        assert!(v.checked_out_at.is_some());
    }

    #[test]
    fn test_cancel_expected_visit() {
        let mut v = Visit::new("Alan", Uuid::new_v4(), Utc::now());
        v.cancel(Utc::now()).unwrap();
        assert_eq!(v.status, VisitStatus::Cancelled);
    }
}
