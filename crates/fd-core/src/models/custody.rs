use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

string_enum! {
    pub enum CustodyStatus {
        PendingAcknowledgment => "pending_acknowledgment",
        Acknowledged => "acknowledged",
        Returned => "returned",
    }
}

/// Hand-off of an asset to an employee.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustodyItem {
    pub id: Uuid,
    pub asset_id: Uuid,
    pub employee_id: Uuid,
    /// Admin user who issued the asset.
    pub issued_by: Option<Uuid>,
    pub issued_at: DateTime<Utc>,
    pub status: CustodyStatus,
    pub notes: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
}

impl CustodyItem {
    pub fn issue(asset_id: Uuid, employee_id: Uuid, issued_by: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            asset_id,
            employee_id,
            issued_by,
            issued_at: Utc::now(),
            status: CustodyStatus::PendingAcknowledgment,
            notes: None,
            acknowledged_at: None,
            returned_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status != CustodyStatus::Returned
    }

    pub fn acknowledge(&mut self, now: DateTime<Utc>) -> Result<(), String> {
        if self.status != CustodyStatus::PendingAcknowledgment {
            return Err(format!("custody item is already {}", self.status));
        }
        self.status = CustodyStatus::Acknowledged;
        self.acknowledged_at = Some(now);
        Ok(())
    }

    pub fn mark_returned(&mut self, now: DateTime<Utc>) -> Result<(), String> {
        if self.status == CustodyStatus::Returned {
            return Err("custody item is already returned".to_string());
        }
        self.status = CustodyStatus::Returned;
        self.returned_at = Some(now);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CustodyFilter {
    pub employee_id: Option<Uuid>,
    pub asset_id: Option<Uuid>,
    pub status: Option<CustodyStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custody_lifecycle() {
        let mut item = CustodyItem::issue(Uuid::new_v4(), Uuid::new_v4(), None);
        assert!(item.is_open());

        item.acknowledge(Utc::now()).unwrap();
        assert!(item.acknowledge(Utc::now()).is_err());

        item.mark_returned(Utc::now()).unwrap();
        assert!(!item.is_open());
        assert!(item.mark_returned(Utc::now()).is_err());
    }

    #[test]
    fn test_return_without_acknowledgment() {
        let mut item = CustodyItem::issue(Uuid::new_v4(), Uuid::new_v4(), None);
        item.mark_returned(Utc::now()).unwrap();
        assert!(item.acknowledged_at.is_none());
        assert!(item.acknowledge(Utc::now()).is_err());
    }
}
