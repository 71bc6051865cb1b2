use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

string_enum! {
    pub enum RecipientType {
        Employee => "employee",
        User => "user",
    }
}

/// In-app notification shown in the portal or the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_type: RecipientType,
    pub recipient_id: Uuid,
    pub title: String,
    pub body: Option<String>,
    pub link: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn for_employee(employee_id: Uuid, title: impl Into<String>) -> Self {
        Self::new(RecipientType::Employee, employee_id, title)
    }

    pub fn for_user(user_id: Uuid, title: impl Into<String>) -> Self {
        Self::new(RecipientType::User, user_id, title)
    }

    fn new(recipient_type: RecipientType, recipient_id: Uuid, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient_type,
            recipient_id,
            title: title.into(),
            body: None,
            link: None,
            read: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }
}
