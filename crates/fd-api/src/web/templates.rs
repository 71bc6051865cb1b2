//! Askama template definitions for the web dashboard and portal.

use askama::Template;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use fd_core::ipam::{AddressEntry, AddressStatus, ScanReport};
use fd_core::{Asset, AuditEntry, SlaSummary, Subnet, Ticket, User};

// ============================================
// User Info (for navigation display)
// ============================================

#[derive(Clone)]
pub struct CurrentUserInfo {
    pub username: String,
    pub display_name: Option<String>,
    pub role: String,
}

impl From<&User> for CurrentUserInfo {
    fn from(user: &User) -> Self {
        Self {
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            role: user.role.to_string(),
        }
    }
}

// ============================================
// Login
// ============================================

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub error: Option<String>,
    pub csrf_token: String,
}

// ============================================
// Dashboard
// ============================================

#[derive(Template)]
#[template(path = "dashboard.html")]
pub struct DashboardTemplate {
    pub active_nav: String,
    pub current_user: Option<CurrentUserInfo>,
    pub total_assets: i64,
    /// `(status, count)` for every asset status.
    pub assets_by_status: Vec<(String, i64)>,
    pub open_tickets: i64,
    pub breached_tickets: i64,
    pub visitors_on_site: i64,
    /// Open tickets closest to their breach point.
    pub tickets: Vec<TicketRow>,
}

/// One `<option>` of a filter dropdown.
#[derive(Clone)]
pub struct SelectOption {
    pub value: String,
    pub selected: bool,
}

impl SelectOption {
    /// Options for every value, marking the one equal to `current`.
    pub fn list<T: ToString>(values: &[T], current: &str) -> Vec<Self> {
        values
            .iter()
            .map(|v| {
                let value = v.to_string();
                let selected = value == current;
                Self { value, selected }
            })
            .collect()
    }
}

// ============================================
// Assets
// ============================================

#[derive(Template)]
#[template(path = "assets.html")]
pub struct AssetsTemplate {
    pub active_nav: String,
    pub current_user: Option<CurrentUserInfo>,
    pub assets: Vec<AssetRow>,
    pub total_count: i64,
    pub status_filter: String,
    pub status_options: Vec<SelectOption>,
    pub query: String,
    pub page: u32,
    pub total_pages: u32,
}

#[derive(Clone)]
pub struct AssetRow {
    pub id: Uuid,
    pub asset_tag: String,
    pub name: String,
    pub asset_type: String,
    pub status: String,
    pub hostname: String,
    pub ip_address: String,
    pub last_seen: String,
}

impl AssetRow {
    pub fn from_asset(asset: &Asset, now: DateTime<Utc>) -> Self {
        Self {
            id: asset.id,
            asset_tag: asset.asset_tag.clone(),
            name: asset.name.clone(),
            asset_type: asset.asset_type.to_string(),
            status: asset.status.to_string(),
            hostname: asset.hostname.clone().unwrap_or_default(),
            ip_address: asset.ip_address.clone().unwrap_or_default(),
            last_seen: asset
                .last_seen_at
                .map(|t| format_time_ago(t, now))
                .unwrap_or_else(|| "never".to_string()),
        }
    }
}

// ============================================
// Tickets
// ============================================

#[derive(Template)]
#[template(path = "tickets.html")]
pub struct TicketsTemplate {
    pub active_nav: String,
    pub current_user: Option<CurrentUserInfo>,
    pub tickets: Vec<TicketRow>,
    pub total_count: i64,
    pub status_filter: String,
    pub status_options: Vec<SelectOption>,
    pub breached_only: bool,
    pub page: u32,
    pub total_pages: u32,
}

#[derive(Clone)]
pub struct TicketRow {
    pub id: Uuid,
    pub reference: String,
    pub title: String,
    pub priority: String,
    pub status: String,
    pub sla: Option<SlaBadge>,
}

impl TicketRow {
    pub fn from_ticket(ticket: &Ticket, now: DateTime<Utc>) -> Self {
        let sla = match (ticket.sla_state(now), ticket.sla_breach_at) {
            (Some(state), Some(breach_at)) => Some(SlaBadge::from(&state.summary(breach_at))),
            _ => None,
        };
        Self {
            id: ticket.id,
            reference: ticket.reference(),
            title: ticket.title.clone(),
            priority: ticket.priority.to_string(),
            status: ticket.status.to_string(),
            sla,
        }
    }
}

#[derive(Clone)]
pub struct SlaBadge {
    pub label: String,
    pub css_class: String,
    pub breach_at: String,
}

impl From<&SlaSummary> for SlaBadge {
    fn from(summary: &SlaSummary) -> Self {
        Self {
            label: summary.label.clone(),
            css_class: summary.css_class.to_string(),
            breach_at: summary.breach_at.format("%Y-%m-%d %H:%M UTC").to_string(),
        }
    }
}

/// Self-refreshing SLA badge for one ticket.
#[derive(Template)]
#[template(path = "partials/sla_badge.html")]
pub struct SlaBadgeTemplate {
    pub ticket_id: Uuid,
    pub badge: Option<SlaBadge>,
}

// ============================================
// IPAM
// ============================================

#[derive(Template)]
#[template(path = "ipam.html")]
pub struct IpamTemplate {
    pub active_nav: String,
    pub current_user: Option<CurrentUserInfo>,
    pub subnets: Vec<SubnetRow>,
}

#[derive(Clone)]
pub struct SubnetRow {
    pub id: Uuid,
    pub name: String,
    pub cidr: String,
    pub gateway: String,
    pub vlan: String,
}

impl From<&Subnet> for SubnetRow {
    fn from(subnet: &Subnet) -> Self {
        Self {
            id: subnet.id,
            name: subnet.name.clone(),
            cidr: subnet.cidr.clone(),
            gateway: subnet.gateway.clone().unwrap_or_default(),
            vlan: subnet.vlan_id.map(|v| v.to_string()).unwrap_or_default(),
        }
    }
}

#[derive(Template)]
#[template(path = "ipam_detail.html")]
pub struct IpamDetailTemplate {
    pub active_nav: String,
    pub current_user: Option<CurrentUserInfo>,
    pub subnet_name: String,
    pub cidr: String,
    pub used: usize,
    pub free: usize,
    pub gateway: usize,
    pub total: usize,
    pub utilization: String,
    pub cells: Vec<AddressCell>,
    pub conflicts: Vec<String>,
}

impl IpamDetailTemplate {
    pub fn new(current_user: Option<CurrentUserInfo>, report: &ScanReport) -> Self {
        let scan = &report.scan;
        Self {
            active_nav: "ipam".to_string(),
            current_user,
            subnet_name: report.subnet.name.clone(),
            cidr: scan.network.to_string(),
            used: scan.used,
            free: scan.free,
            gateway: scan.gateway,
            total: scan.total,
            utilization: format!("{:.1}", scan.utilization_percent),
            cells: scan.entries.iter().map(AddressCell::from).collect(),
            conflicts: scan
                .conflicts
                .iter()
                .map(|c| format!("{} is stored on {} and {}", c.address, c.kept, c.ignored))
                .collect(),
        }
    }
}

#[derive(Clone)]
pub struct AddressCell {
    pub address: String,
    /// Last octet, shown inside the grid cell.
    pub host: u8,
    pub css_class: &'static str,
    pub title: String,
}

impl From<&AddressEntry> for AddressCell {
    fn from(entry: &AddressEntry) -> Self {
        let address = entry.address.to_string();
        let (css_class, title) = match (&entry.status, &entry.device) {
            (AddressStatus::Gateway, _) => ("ip-gateway", format!("{} gateway", address)),
            (AddressStatus::Used, Some(device)) => {
                let mut title = format!("{} {} ({})", address, device.name, device.asset_tag);
                if let Some(holder) = &device.assigned_to {
                    title.push_str(&format!(" - {}", holder));
                }
                ("ip-used", title)
            }
            (AddressStatus::Used, None) => ("ip-used", address.clone()),
            (AddressStatus::Free, _) => ("ip-free", format!("{} free", address)),
        };
        Self {
            host: entry.address.octets()[3],
            address,
            css_class,
            title,
        }
    }
}

// ============================================
// Audit
// ============================================

#[derive(Template)]
#[template(path = "audit.html")]
pub struct AuditTemplate {
    pub active_nav: String,
    pub current_user: Option<CurrentUserInfo>,
    pub entries: Vec<AuditRow>,
    pub entity_filter: String,
    pub entity_options: Vec<SelectOption>,
    pub page: u32,
    pub total_pages: u32,
}

#[derive(Clone)]
pub struct AuditRow {
    pub id: Uuid,
    pub timestamp: String,
    pub actor: String,
    pub action: String,
    pub entity_type: String,
    pub entity_name: String,
    pub changes: Vec<ChangeRow>,
}

#[derive(Clone)]
pub struct ChangeRow {
    pub field: String,
    pub old: String,
    pub new: String,
}

impl From<&AuditEntry> for AuditRow {
    fn from(entry: &AuditEntry) -> Self {
        Self {
            id: entry.id,
            timestamp: entry.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            actor: entry.actor_name.clone(),
            action: entry.action.to_string(),
            entity_type: entry.entity_type.to_string(),
            entity_name: entry.entity_name.clone().unwrap_or_default(),
            changes: entry
                .field_changes()
                .into_iter()
                .map(|c| ChangeRow {
                    field: c.field,
                    old: display_value(c.before.as_ref()),
                    new: display_value(c.after.as_ref()),
                })
                .collect(),
        }
    }
}

fn display_value(value: Option<&serde_json::Value>) -> String {
    match value {
        None | Some(serde_json::Value::Null) => "-".to_string(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

// ============================================
// Portal
// ============================================

#[derive(Template)]
#[template(path = "portal/login.html")]
pub struct PortalLoginTemplate {
    pub error: Option<String>,
    pub csrf_token: String,
}

#[derive(Template)]
#[template(path = "portal/home.html")]
pub struct PortalHomeTemplate {
    pub employee_name: String,
    /// `(asset tag, name)`.
    pub assets: Vec<(String, String)>,
    pub requests: Vec<TicketRow>,
    pub pending_custody: usize,
    pub unread: i64,
}

/// "5m ago" style relative time.
pub fn format_time_ago(dt: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = now - dt;
    if diff.num_minutes() < 1 {
        "just now".to_string()
    } else if diff.num_hours() < 1 {
        format!("{}m ago", diff.num_minutes())
    } else if diff.num_days() < 1 {
        format!("{}h ago", diff.num_hours())
    } else if diff.num_days() < 7 {
        format!("{}d ago", diff.num_days())
    } else {
        dt.format("%Y-%m-%d").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use fd_core::ipam::DeviceRef;
    use std::net::Ipv4Addr;

    #[test]
    fn test_format_time_ago() {
        let now = Utc::now();
        assert_eq!(format_time_ago(now, now), "just now");
        assert_eq!(format_time_ago(now - Duration::minutes(5), now), "5m ago");
        assert_eq!(format_time_ago(now - Duration::hours(3), now), "3h ago");
        assert_eq!(format_time_ago(now - Duration::days(2), now), "2d ago");
    }

    #[test]
    fn test_address_cell_describes_device() {
        let entry = AddressEntry {
            address: Ipv4Addr::new(10, 0, 0, 12),
            status: AddressStatus::Used,
            device: Some(DeviceRef {
                asset_id: Uuid::new_v4(),
                asset_tag: "LT-0012".to_string(),
                name: "Laptop".to_string(),
                hostname: None,
                assigned_to: Some("Ada Lovelace".to_string()),
            }),
        };
        let cell = AddressCell::from(&entry);
        assert_eq!(cell.host, 12);
        assert_eq!(cell.css_class, "ip-used");
        assert!(cell.title.contains("LT-0012"));
        assert!(cell.title.contains("Ada Lovelace"));
    }

    #[test]
    fn test_select_option_marks_current() {
        let options = SelectOption::list(&["open", "closed"], "closed");
        assert!(!options[0].selected);
        assert!(options[1].selected);
    }

    #[test]
    fn test_sla_badge_renders_refresh_trigger() {
        let id = Uuid::new_v4();
        let rendered = SlaBadgeTemplate {
            ticket_id: id,
            badge: Some(SlaBadge {
                label: "3h 20m left".to_string(),
                css_class: "sla-warning".to_string(),
                breach_at: "2026-01-05 14:00 UTC".to_string(),
            }),
        }
        .render()
        .unwrap();
        assert!(rendered.contains(&format!("/web/partials/tickets/{}/sla", id)));
        assert!(rendered.contains("every 60s"));
        assert!(rendered.contains("sla-warning"));
    }
}
