//! Append-only audit trail.
//!
//! Every mutating operation records who did what to which entity, with a
//! JSON `changes` document:
//!
//! * create: `{"after": {...}}`
//! * delete: `{"before": {...}}`
//! * update: `{"before": {...}, "after": {...}}` holding only the keys that
//!   differ
//!
//! Writes go through [`AuditRecorder`], which never fails the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::auth::User;
use crate::models::Employee;

string_enum! {
    pub enum ActorType {
        User => "user",
        Employee => "employee",
        Agent => "agent",
        System => "system",
    }
}

string_enum! {
    pub enum AuditAction {
        Create => "create",
        Update => "update",
        Delete => "delete",
        Login => "login",
        Logout => "logout",
        LoginFailed => "login_failed",
        GrantPermission => "grant_permission",
        RevokePermission => "revoke_permission",
        Assign => "assign",
        Acknowledge => "acknowledge",
        Return => "return",
        Scan => "scan",
        CheckIn => "check_in",
        CheckOut => "check_out",
        Cancel => "cancel",
        Complete => "complete",
        RunMaintenance => "run_maintenance",
        Restore => "restore",
        PasswordReset => "password_reset",
    }
}

string_enum! {
    pub enum EntityType {
        User => "user",
        Employee => "employee",
        Department => "department",
        Location => "location",
        Asset => "asset",
        Ticket => "ticket",
        ServiceCategory => "service_category",
        ServiceItem => "service_item",
        KnowledgeCategory => "knowledge_category",
        KnowledgeArticle => "knowledge_article",
        Room => "room",
        Booking => "booking",
        Subnet => "subnet",
        Visit => "visit",
        CustodyItem => "custody_item",
        AgentCommand => "agent_command",
        System => "system",
    }
}

/// Fields that change on every save and carry no audit value.
const IGNORED_FIELDS: &[&str] = &["updated_at"];

/// Field name used when comparing non-object snapshots.
pub const WHOLE_VALUE_FIELD: &str = "$";

/// Who performed an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub actor_type: ActorType,
    pub id: Option<Uuid>,
    pub name: String,
}

impl Actor {
    pub fn user(user: &User) -> Self {
        Self {
            actor_type: ActorType::User,
            id: Some(user.id),
            name: user.username.clone(),
        }
    }

    pub fn employee(employee: &Employee) -> Self {
        Self {
            actor_type: ActorType::Employee,
            id: Some(employee.id),
            name: employee.email.clone(),
        }
    }

    pub fn agent(identity: impl Into<String>) -> Self {
        Self {
            actor_type: ActorType::Agent,
            id: None,
            name: identity.into(),
        }
    }

    pub fn system() -> Self {
        Self {
            actor_type: ActorType::System,
            id: None,
            name: "system".to_string(),
        }
    }

    /// Someone who attempted to log in but could not be identified.
    pub fn anonymous(claimed: impl Into<String>) -> Self {
        Self {
            actor_type: ActorType::User,
            id: None,
            name: claimed.into(),
        }
    }
}

/// Request metadata copied onto audit entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor_type: ActorType,
    pub actor_id: Option<Uuid>,
    pub actor_name: String,
    pub action: AuditAction,
    pub entity_type: EntityType,
    pub entity_id: Option<String>,
    pub entity_name: Option<String>,
    pub changes: Option<Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(actor: &Actor, action: AuditAction, entity_type: EntityType) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_type: actor.actor_type,
            actor_id: actor.id,
            actor_name: actor.name.clone(),
            action,
            entity_type,
            entity_id: None,
            entity_name: None,
            changes: None,
            ip_address: None,
            user_agent: None,
            request_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn entity(mut self, id: impl ToString, name: impl Into<String>) -> Self {
        self.entity_id = Some(id.to_string());
        self.entity_name = Some(name.into());
        self
    }

    pub fn with_changes(mut self, changes: Option<Value>) -> Self {
        self.changes = changes;
        self
    }

    pub fn with_meta(mut self, meta: &RequestMeta) -> Self {
        self.ip_address = meta.ip_address.clone();
        self.user_agent = meta.user_agent.clone();
        self.request_id = meta.request_id.clone();
        self
    }

    /// The full state this entry captured. Updates carry an explicit
    /// `snapshot` next to their partial diff; creations and details use
    /// `after`, deletions `before`.
    pub fn snapshot(&self) -> Option<&Value> {
        let changes = self.changes.as_ref()?;
        changes
            .get("snapshot")
            .or_else(|| changes.get("after"))
            .or_else(|| changes.get("before"))
    }

    pub fn field_changes(&self) -> Vec<FieldChange> {
        self.changes.as_ref().map(field_changes).unwrap_or_default()
    }
}

/// Builders for the `changes` document.
pub struct ChangeSet;

impl ChangeSet {
    pub fn created<T: Serialize>(value: &T) -> Option<Value> {
        let after = serde_json::to_value(value).ok()?;
        Some(serde_json::json!({ "after": after }))
    }

    pub fn deleted<T: Serialize>(value: &T) -> Option<Value> {
        let before = serde_json::to_value(value).ok()?;
        Some(serde_json::json!({ "before": before }))
    }

    /// Before/after pair restricted to differing keys, plus the full new
    /// state under `snapshot`. `None` when nothing changed.
    pub fn between<T: Serialize>(old: &T, new: &T) -> Option<Value> {
        let old = serde_json::to_value(old).ok()?;
        let new = serde_json::to_value(new).ok()?;

        let (before, after, snapshot) = match (old, new) {
            (Value::Object(old), Value::Object(new)) => {
                let mut before = Map::new();
                let mut after = Map::new();
                for key in union_keys(&old, &new) {
                    if IGNORED_FIELDS.contains(&key.as_str()) {
                        continue;
                    }
                    let o = old.get(&key).cloned().unwrap_or(Value::Null);
                    let n = new.get(&key).cloned().unwrap_or(Value::Null);
                    if o != n {
                        before.insert(key.clone(), o);
                        after.insert(key, n);
                    }
                }
                if before.is_empty() {
                    return None;
                }
                let snapshot: Map<String, Value> = new
                    .into_iter()
                    .filter(|(key, _)| !IGNORED_FIELDS.contains(&key.as_str()))
                    .collect();
                (Value::Object(before), Value::Object(after), Value::Object(snapshot))
            }
            (old, new) if old == new => return None,
            (old, new) => (old, new.clone(), new),
        };

        Some(serde_json::json!({ "before": before, "after": after, "snapshot": snapshot }))
    }

    /// Arbitrary detail payload for non-CRUD actions.
    pub fn detail(value: Value) -> Option<Value> {
        Some(serde_json::json!({ "after": value }))
    }
}

fn union_keys(a: &Map<String, Value>, b: &Map<String, Value>) -> BTreeSet<String> {
    a.keys().chain(b.keys()).cloned().collect()
}

/// One field's before/after pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldChange {
    pub field: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

/// Flattens a `changes` document into per-field pairs, sorted by field.
pub fn field_changes(changes: &Value) -> Vec<FieldChange> {
    let before = changes.get("before");
    let after = changes.get("after");

    match (before, after) {
        (Some(Value::Object(b)), Some(Value::Object(a))) => union_keys(b, a)
            .into_iter()
            .map(|field| FieldChange {
                before: b.get(&field).cloned(),
                after: a.get(&field).cloned(),
                field,
            })
            .collect(),
        (Some(Value::Object(b)), None) => b
            .iter()
            .map(|(k, v)| FieldChange {
                field: k.clone(),
                before: Some(v.clone()),
                after: None,
            })
            .collect(),
        (None, Some(Value::Object(a))) => a
            .iter()
            .map(|(k, v)| FieldChange {
                field: k.clone(),
                before: None,
                after: Some(v.clone()),
            })
            .collect(),
        (None, None) => Vec::new(),
        (b, a) => vec![FieldChange {
            field: WHOLE_VALUE_FIELD.to_string(),
            before: b.cloned(),
            after: a.cloned(),
        }],
    }
}

/// Key-by-key diff of two snapshots, sorted by key, differing keys only.
/// Bookkeeping timestamps are not compared.
pub fn compare_versions(left: &Value, right: &Value) -> Vec<FieldChange> {
    match (left, right) {
        (Value::Object(l), Value::Object(r)) => union_keys(l, r)
            .into_iter()
            .filter(|field| !IGNORED_FIELDS.contains(&field.as_str()))
            .filter_map(|field| {
                let before = l.get(&field).cloned();
                let after = r.get(&field).cloned();
                (before != after).then_some(FieldChange {
                    field,
                    before,
                    after,
                })
            })
            .collect(),
        (l, r) if l == r => Vec::new(),
        (l, r) => vec![FieldChange {
            field: WHOLE_VALUE_FIELD.to_string(),
            before: Some(l.clone()),
            after: Some(r.clone()),
        }],
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<String>,
    pub actor_id: Option<Uuid>,
    pub action: Option<AuditAction>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[cfg(feature = "database")]
mod recorder {
    use super::AuditEntry;
    use crate::db::{create_audit_repository, AuditRepository, DbPool};
    use tracing::{debug, warn};

    /// Best-effort audit writer. Failures are logged and counted, never
    /// returned.
    pub struct AuditRecorder {
        repo: Box<dyn AuditRepository>,
    }

    impl AuditRecorder {
        pub fn new(pool: &DbPool) -> Self {
            Self {
                repo: create_audit_repository(pool),
            }
        }

        pub fn with_repository(repo: Box<dyn AuditRepository>) -> Self {
            Self { repo }
        }

        pub async fn record(&self, entry: AuditEntry) {
            match self.repo.insert(&entry).await {
                Ok(()) => debug!(
                    action = %entry.action,
                    entity_type = %entry.entity_type,
                    entity_id = entry.entity_id.as_deref().unwrap_or("-"),
                    "Audit entry recorded"
                ),
                Err(e) => {
                    metrics::counter!("fleetdesk_audit_write_failures_total").increment(1);
                    warn!(
                        error = %e,
                        action = %entry.action,
                        entity_type = %entry.entity_type,
                        "Failed to write audit entry"
                    );
                }
            }
        }
    }
}

#[cfg(feature = "database")]
pub use recorder::AuditRecorder;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Widget {
        name: String,
        size: u32,
        updated_at: String,
    }

    #[test]
    fn test_between_keeps_only_differing_keys() {
        let old = Widget {
            name: "a".into(),
            size: 1,
            updated_at: "t1".into(),
        };
        let new = Widget {
            name: "a".into(),
            size: 2,
            updated_at: "t2".into(),
        };
        let changes = ChangeSet::between(&old, &new).unwrap();
        assert_eq!(
            changes,
            json!({
                "before": {"size": 1},
                "after": {"size": 2},
                "snapshot": {"name": "a", "size": 2}
            })
        );
        // The snapshot does not leak into the per-field view.
        assert_eq!(field_changes(&changes).len(), 1);
    }

    #[test]
    fn test_compare_versions_of_successive_updates() {
        #[derive(Serialize)]
        struct Device {
            name: String,
            status: String,
        }
        let v1 = Device {
            name: "a".into(),
            status: "in_stock".into(),
        };
        let v2 = Device {
            name: "a".into(),
            status: "assigned".into(),
        };
        let v3 = Device {
            name: "b".into(),
            status: "assigned".into(),
        };
        let actor = Actor::system();
        let first = AuditEntry::new(&actor, AuditAction::Update, EntityType::Asset)
            .with_changes(ChangeSet::between(&v1, &v2));
        let second = AuditEntry::new(&actor, AuditAction::Update, EntityType::Asset)
            .with_changes(ChangeSet::between(&v2, &v3));

        let diff = compare_versions(first.snapshot().unwrap(), second.snapshot().unwrap());
        assert_eq!(
            diff,
            vec![FieldChange {
                field: "name".into(),
                before: Some(json!("a")),
                after: Some(json!("b")),
            }]
        );
    }

    #[test]
    fn test_between_without_difference_is_none() {
        let w = Widget {
            name: "a".into(),
            size: 1,
            updated_at: "t".into(),
        };
        assert!(ChangeSet::between(&w, &w).is_none());
    }

    #[test]
    fn test_created_and_deleted_shapes() {
        let w = Widget {
            name: "a".into(),
            size: 1,
            updated_at: "t".into(),
        };
        assert_eq!(ChangeSet::created(&w).unwrap()["after"]["name"], "a");
        assert!(ChangeSet::created(&w).unwrap().get("before").is_none());
        assert_eq!(ChangeSet::deleted(&w).unwrap()["before"]["size"], 1);
    }

    #[test]
    fn test_field_changes_for_update() {
        let changes = json!({
            "before": {"status": "open", "priority": "low"},
            "after": {"status": "closed", "priority": "high"}
        });
        let fc = field_changes(&changes);
        assert_eq!(fc.len(), 2);
        assert_eq!(fc[0].field, "priority");
        assert_eq!(fc[1].field, "status");
        assert_eq!(fc[1].before, Some(json!("open")));
        assert_eq!(fc[1].after, Some(json!("closed")));
    }

    #[test]
    fn test_field_changes_for_create_and_delete() {
        let created = field_changes(&json!({"after": {"name": "x"}}));
        assert_eq!(created[0].before, None);
        assert_eq!(created[0].after, Some(json!("x")));

        let deleted = field_changes(&json!({"before": {"name": "x"}}));
        assert_eq!(deleted[0].before, Some(json!("x")));
        assert_eq!(deleted[0].after, None);

        assert!(field_changes(&json!({})).is_empty());
    }

    #[test]
    fn test_compare_versions_union_of_keys() {
        let left = json!({"a": 1, "b": 2, "c": 3});
        let right = json!({"b": 2, "c": 4, "d": 5});
        let diff = compare_versions(&left, &right);
        let fields: Vec<_> = diff.iter().map(|f| f.field.as_str()).collect();
        assert_eq!(fields, vec!["a", "c", "d"]);
        assert_eq!(diff[0].after, None);
        assert_eq!(diff[2].before, None);
    }

    #[test]
    fn test_compare_versions_scalars() {
        assert!(compare_versions(&json!(5), &json!(5)).is_empty());
        let diff = compare_versions(&json!("x"), &json!({"a": 1}));
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].field, WHOLE_VALUE_FIELD);
    }

    #[test]
    fn test_compare_versions_ignores_bookkeeping() {
        let left = json!({"name": "a", "updated_at": "t1"});
        let right = json!({"name": "a", "updated_at": "t2"});
        assert!(compare_versions(&left, &right).is_empty());
    }

    #[test]
    fn test_entry_builder_and_snapshot() {
        let actor = Actor::system();
        let meta = RequestMeta {
            ip_address: Some("10.0.0.5".into()),
            user_agent: None,
            request_id: Some("req-1".into()),
        };
        let entry = AuditEntry::new(&actor, AuditAction::Delete, EntityType::Subnet)
            .entity(Uuid::nil(), "Office LAN")
            .with_changes(Some(json!({"before": {"cidr": "10.0.0.0/24"}})))
            .with_meta(&meta);

        assert_eq!(entry.actor_type, ActorType::System);
        assert_eq!(entry.entity_name.as_deref(), Some("Office LAN"));
        assert_eq!(entry.request_id.as_deref(), Some("req-1"));
        assert_eq!(entry.snapshot(), Some(&json!({"cidr": "10.0.0.0/24"})));
    }
}
