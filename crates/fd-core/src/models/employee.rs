use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Department {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Department {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub floor: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Location {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            address: None,
            floor: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A member of staff. Employees are not admin users; they reach the
/// system through the self-service portal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Employee {
    pub id: Uuid,
    pub employee_number: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub job_title: Option<String>,
    pub phone: Option<String>,
    pub department_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub manager_id: Option<Uuid>,
    pub active: bool,
    /// Portal password. `None` until bootstrapped from the CLI.
    #[serde(skip_serializing, default)]
    pub portal_password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Employee {
    pub fn new(
        employee_number: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            employee_number: employee_number.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: email.into(),
            job_title: None,
            phone: None,
            department_id: None,
            location_id: None,
            manager_id: None,
            active: true,
            portal_password_hash: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn can_use_portal(&self) -> bool {
        self.active && self.portal_password_hash.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct EmployeeFilter {
    pub department_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub active: Option<bool>,
    /// Matches names, email or employee number.
    pub search: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name_and_portal_access() {
        let mut e = Employee::new("E-100", "Ada", "Lovelace", "ada@example.com");
        assert_eq!(e.full_name(), "Ada Lovelace");
        assert!(!e.can_use_portal());

        e.portal_password_hash = Some("$argon2id$...".into());
        assert!(e.can_use_portal());

        e.active = false;
        assert!(!e.can_use_portal());
    }

    #[test]
    fn test_portal_hash_never_serialized() {
        let mut e = Employee::new("E-1", "A", "B", "a@example.com");
        e.portal_password_hash = Some("secret-hash".into());
        let json = serde_json::to_string(&e).unwrap();
        assert!(!json.contains("secret-hash"));
    }
}
