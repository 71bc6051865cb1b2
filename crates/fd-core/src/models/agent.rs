use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

string_enum! {
    pub enum CommandStatus {
        Pending => "pending",
        Dispatched => "dispatched",
        Completed => "completed",
        Failed => "failed",
    }
}

/// A command queued for the endpoint agent running on an asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentCommand {
    pub id: Uuid,
    pub asset_id: Uuid,
    pub command: String,
    pub status: CommandStatus,
    pub output: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AgentCommand {
    pub fn new(asset_id: Uuid, command: impl Into<String>, created_by: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            asset_id,
            command: command.into(),
            status: CommandStatus::Pending,
            output: None,
            created_by,
            created_at: Utc::now(),
            dispatched_at: None,
            completed_at: None,
        }
    }
}

/// Inventory report posted by an agent on check-in.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentReport {
    pub hostname: Option<String>,
    pub serial_number: Option<String>,
    pub mac_address: Option<String>,
    pub ip_address: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
}

impl AgentReport {
    /// An agent must identify itself by at least one of serial, hostname or MAC.
    pub fn has_identity(&self) -> bool {
        [&self.serial_number, &self.hostname, &self.mac_address]
            .iter()
            .any(|v| v.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false))
    }

    /// Display name for an asset created from this report.
    pub fn display_name(&self) -> String {
        self.hostname
            .clone()
            .or_else(|| {
                self.model
                    .as_ref()
                    .map(|m| format!("{} {}", self.manufacturer.as_deref().unwrap_or(""), m))
            })
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "Discovered device".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_identity() {
        assert!(!AgentReport::default().has_identity());
        let r = AgentReport {
            hostname: Some("  ".into()),
            ..Default::default()
        };
        assert!(!r.has_identity());
        let r = AgentReport {
            mac_address: Some("aa:bb:cc:dd:ee:ff".into()),
            ..Default::default()
        };
        assert!(r.has_identity());
    }

    #[test]
    fn test_report_display_name() {
        let r = AgentReport {
            model: Some("OptiPlex 7090".into()),
            manufacturer: Some("Dell".into()),
            ..Default::default()
        };
        assert_eq!(r.display_name(), "Dell OptiPlex 7090");
        assert_eq!(AgentReport::default().display_name(), "Discovered device");
    }
}
