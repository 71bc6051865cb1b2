//! Application state shared across handlers.

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use fd_core::db::DbPool;
use fd_core::{AuditEntry, AuditRecorder, SlaPolicy};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    /// Best-effort audit writer.
    pub audit: Arc<AuditRecorder>,
    /// Resolution windows used when tickets are opened or re-prioritised.
    pub sla_policy: SlaPolicy,
    /// Shared secret for agent request signatures. Agent endpoints answer
    /// 503 while this is unset.
    pub agent_secret: Option<Arc<String>>,
    pub prometheus_handle: Option<Arc<PrometheusHandle>>,
}

impl AppState {
    pub fn new(db: DbPool) -> Self {
        let audit = AuditRecorder::new(&db);
        Self {
            db: Arc::new(db),
            audit: Arc::new(audit),
            sla_policy: SlaPolicy::default(),
            agent_secret: None,
            prometheus_handle: None,
        }
    }

    pub fn with_sla_policy(mut self, policy: SlaPolicy) -> Self {
        self.sla_policy = policy;
        self
    }

    pub fn with_agent_secret(mut self, secret: Option<String>) -> Self {
        self.agent_secret = secret.filter(|s| !s.is_empty()).map(Arc::new);
        self
    }

    pub fn with_prometheus_handle(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus_handle = Some(Arc::new(handle));
        self
    }

    pub fn with_audit_recorder(mut self, recorder: AuditRecorder) -> Self {
        self.audit = Arc::new(recorder);
        self
    }

    /// Records an audit entry. Never fails the caller.
    pub async fn audit(&self, entry: AuditEntry) {
        self.audit.record(entry).await;
    }
}
