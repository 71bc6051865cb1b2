//! Admin accounts, roles and the permission model.
//!
//! Every admin user has a [`Role`] that grants a default set of
//! [`Permission`]s. Additional permissions can be granted per user; the
//! effective set is the union of both.

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

const TOKEN_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

string_enum! {
    /// Coarse role of an admin account.
    pub enum Role {
        /// Full access.
        Admin => "admin",
        /// Day-to-day IT operations.
        Technician => "technician",
        /// Read-only dashboards.
        Viewer => "viewer",
    }
}

string_enum! {
    /// Fine-grained capability checked by mutating endpoints.
    pub enum Permission {
        ManageAssets => "manage_assets",
        ManageEmployees => "manage_employees",
        ManageOrganization => "manage_organization",
        ManageTickets => "manage_tickets",
        ManageNetwork => "manage_network",
        ManageKnowledge => "manage_knowledge",
        ManageBookings => "manage_bookings",
        ManageVisitors => "manage_visitors",
        ManageCustody => "manage_custody",
        ManageUsers => "manage_users",
        ManagePermissions => "manage_permissions",
        ViewAudit => "view_audit",
        RunMaintenance => "run_maintenance",
        ManageBackups => "manage_backups",
        ManageCatalog => "manage_catalog",
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Viewer
    }
}

impl Role {
    /// Permissions every user with this role holds.
    pub fn default_permissions(&self) -> BTreeSet<Permission> {
        match self {
            Role::Admin => Permission::ALL.iter().copied().collect(),
            Role::Technician => BTreeSet::from([
                Permission::ManageAssets,
                Permission::ManageTickets,
                Permission::ManageNetwork,
                Permission::ManageKnowledge,
                Permission::ManageBookings,
                Permission::ManageVisitors,
                Permission::ManageCustody,
                Permission::RunMaintenance,
                Permission::ViewAudit,
            ]),
            Role::Viewer => BTreeSet::new(),
        }
    }
}

/// An admin account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub role: Role,
    pub display_name: Option<String>,
    pub enabled: bool,
    /// Permissions granted on top of the role defaults.
    #[serde(default)]
    pub granted_permissions: BTreeSet<Permission>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password_hash: impl Into<String>,
        role: Role,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            email: email.into(),
            password_hash: password_hash.into(),
            role,
            display_name: None,
            enabled: true,
            granted_permissions: BTreeSet::new(),
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Display name, falling back to the username.
    pub fn display(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }

    /// Role defaults plus explicit grants.
    pub fn effective_permissions(&self) -> BTreeSet<Permission> {
        let mut all = self.role.default_permissions();
        all.extend(self.granted_permissions.iter().copied());
        all
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.role.default_permissions().contains(&permission)
            || self.granted_permissions.contains(&permission)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub enabled: Option<bool>,
    pub search: Option<String>,
}

fn random_token(len: usize) -> String {
    (0..len)
        .map(|_| TOKEN_CHARSET[OsRng.gen_range(0..TOKEN_CHARSET.len())] as char)
        .collect()
}

/// Admin session payload stored server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
    pub csrf_token: String,
}

impl SessionData {
    pub fn new(user: &User) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            role: user.role,
            csrf_token: random_token(32),
        }
    }
}

/// Employee portal session payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployeeSessionData {
    pub employee_id: Uuid,
    pub email: String,
    pub csrf_token: String,
}

impl EmployeeSessionData {
    pub fn new(employee_id: Uuid, email: impl Into<String>) -> Self {
        Self {
            employee_id,
            email: email.into(),
            csrf_token: random_token(32),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("technician".parse::<Role>(), Ok(Role::Technician));
        assert_eq!("ADMIN".parse::<Role>(), Ok(Role::Admin));
        assert!("analyst".parse::<Role>().is_err());
        assert_eq!(Role::default(), Role::Viewer);
    }

    #[test]
    fn test_admin_has_every_permission() {
        let user = User::new("root", "root@example.com", "x", Role::Admin);
        for p in Permission::ALL {
            assert!(user.has_permission(*p), "admin missing {p}");
        }
        assert_eq!(user.effective_permissions().len(), Permission::ALL.len());
    }

    #[test]
    fn test_technician_defaults() {
        let user = User::new("tech", "tech@example.com", "x", Role::Technician);
        assert!(user.has_permission(Permission::ManageAssets));
        assert!(user.has_permission(Permission::RunMaintenance));
        assert!(user.has_permission(Permission::ViewAudit));
        assert!(!user.has_permission(Permission::ManageUsers));
        assert!(!user.has_permission(Permission::ManageBackups));
        assert!(!user.has_permission(Permission::ManageCatalog));
    }

    #[test]
    fn test_viewer_with_grant() {
        let mut user = User::new("view", "view@example.com", "x", Role::Viewer);
        assert!(user.effective_permissions().is_empty());
        assert!(!user.has_permission(Permission::ManageKnowledge));

        user.granted_permissions.insert(Permission::ManageKnowledge);
        assert!(user.has_permission(Permission::ManageKnowledge));
        assert!(!user.has_permission(Permission::ManageAssets));
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let user = User::new("u", "u@example.com", "$argon2id$secret", Role::Viewer);
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("argon2id"));
        assert!(json.contains("\"role\":\"viewer\""));
    }

    #[test]
    fn test_session_tokens_are_random() {
        let user = User::new("u", "u@example.com", "x", Role::Viewer);
        let a = SessionData::new(&user);
        let b = SessionData::new(&user);
        assert_eq!(a.csrf_token.len(), 32);
        assert_ne!(a.csrf_token, b.csrf_token);
    }
}
