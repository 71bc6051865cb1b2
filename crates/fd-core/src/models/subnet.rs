use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An IPv4 network tracked in IPAM. `cidr` is stored normalised to its
/// network address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subnet {
    pub id: Uuid,
    pub name: String,
    pub cidr: String,
    pub gateway: Option<String>,
    pub vlan_id: Option<i32>,
    pub location_id: Option<Uuid>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subnet {
    pub fn new(name: impl Into<String>, cidr: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            cidr: cidr.into(),
            gateway: None,
            vlan_id: None,
            location_id: None,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }
}
