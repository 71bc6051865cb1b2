use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

string_enum! {
    pub enum AssetType {
        Laptop => "laptop",
        Desktop => "desktop",
        Server => "server",
        Monitor => "monitor",
        Phone => "phone",
        Printer => "printer",
        NetworkDevice => "network_device",
        Peripheral => "peripheral",
        Other => "other",
    }
}

string_enum! {
    pub enum AssetStatus {
        InStock => "in_stock",
        Assigned => "assigned",
        InRepair => "in_repair",
        Retired => "retired",
        Lost => "lost",
    }
}

impl AssetStatus {
    /// Retired and lost assets are out of service and never scheduled.
    pub fn in_service(&self) -> bool {
        !matches!(self, AssetStatus::Retired | AssetStatus::Lost)
    }
}

/// A tracked piece of hardware.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Asset {
    pub id: Uuid,
    pub asset_tag: String,
    pub name: String,
    pub asset_type: AssetType,
    pub status: AssetStatus,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub hostname: Option<String>,
    pub ip_address: Option<String>,
    pub mac_address: Option<String>,
    pub location_id: Option<Uuid>,
    pub assigned_employee_id: Option<Uuid>,
    pub purchase_date: Option<NaiveDate>,
    /// Purchase cost in cents.
    pub purchase_cost: Option<i64>,
    pub warranty_expires: Option<NaiveDate>,
    pub maintenance_interval_days: Option<i32>,
    pub next_maintenance_date: Option<NaiveDate>,
    /// Last agent check-in.
    pub last_seen_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Asset {
    pub fn new(asset_tag: impl Into<String>, name: impl Into<String>, asset_type: AssetType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            asset_tag: asset_tag.into(),
            name: name.into(),
            asset_type,
            status: AssetStatus::InStock,
            serial_number: None,
            manufacturer: None,
            model: None,
            hostname: None,
            ip_address: None,
            mac_address: None,
            location_id: None,
            assigned_employee_id: None,
            purchase_date: None,
            purchase_cost: None,
            warranty_expires: None,
            maintenance_interval_days: None,
            next_maintenance_date: None,
            last_seen_at: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Tag used for assets created by agent discovery, e.g. `AUTO-3F9A0C21`.
    pub fn generate_auto_tag() -> String {
        let n: u32 = rand::thread_rng().gen();
        format!("AUTO-{:08X}", n)
    }

    pub fn is_maintenance_due(&self, today: NaiveDate) -> bool {
        self.status.in_service()
            && self
                .next_maintenance_date
                .map(|due| due <= today)
                .unwrap_or(false)
    }

    pub fn warranty_active(&self, today: NaiveDate) -> bool {
        self.warranty_expires.map(|d| d >= today).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AssetFilter {
    pub status: Option<AssetStatus>,
    pub asset_type: Option<AssetType>,
    pub employee_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    /// Matches tag, name, serial number or hostname.
    pub search: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_tag_format() {
        let tag = Asset::generate_auto_tag();
        assert!(tag.starts_with("AUTO-"));
        assert_eq!(tag.len(), 13);
        assert!(tag[5..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_maintenance_due() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let mut asset = Asset::new("LAP-001", "ThinkPad", AssetType::Laptop);
        assert!(!asset.is_maintenance_due(today));

        asset.next_maintenance_date = NaiveDate::from_ymd_opt(2024, 6, 1);
        assert!(asset.is_maintenance_due(today));

        asset.status = AssetStatus::Retired;
        assert!(!asset.is_maintenance_due(today));

        asset.status = AssetStatus::Assigned;
        asset.next_maintenance_date = NaiveDate::from_ymd_opt(2024, 6, 2);
        assert!(!asset.is_maintenance_due(today));
    }

    #[test]
    fn test_enum_round_trip_through_db_str() {
        for t in AssetType::ALL {
            assert_eq!(AssetType::from_db_str(t.as_db_str()), Some(*t));
        }
        assert_eq!(
            serde_json::to_string(&AssetType::NetworkDevice).unwrap(),
            "\"network_device\""
        );
        assert_eq!("in_repair".parse::<AssetStatus>(), Ok(AssetStatus::InRepair));
    }
}
