//! Audit trail port.
//!
//! Every state-changing operation emits an [`AuditEvent`]. Sink failures
//! are logged and never fail the business operation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tally_shared::types::{OrganizationId, UserId};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::documents::DocumentKind;

/// A recorded state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Kind of the changed document.
    pub entity_kind: DocumentKind,
    /// ID of the changed document.
    pub entity_id: Uuid,
    /// What happened (e.g. `matched`, `approved`, `reversed`).
    pub action: String,
    /// Acting user, if any.
    pub actor: Option<UserId>,
    /// Snapshot before the change.
    pub before: Option<Value>,
    /// Snapshot after the change.
    pub after: Option<Value>,
    /// When the change happened.
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Creates an event without snapshots.
    pub fn new(
        organization_id: OrganizationId,
        entity_kind: DocumentKind,
        entity_id: impl Into<Uuid>,
        action: impl Into<String>,
        actor: Option<UserId>,
    ) -> Self {
        Self {
            organization_id,
            entity_kind,
            entity_id: entity_id.into(),
            action: action.into(),
            actor,
            before: None,
            after: None,
            occurred_at: Utc::now(),
        }
    }

    /// Attaches before/after snapshots. Unserializable values are dropped.
    #[must_use]
    pub fn with_snapshots<B: Serialize, A: Serialize>(mut self, before: Option<&B>, after: &A) -> Self {
        self.before = before.and_then(|b| serde_json::to_value(b).ok());
        self.after = serde_json::to_value(after).ok();
        self
    }
}

/// Error returned by audit sinks.
#[derive(Debug, thiserror::Error)]
#[error("Audit sink error: {0}")]
pub struct AuditError(pub String);

/// Destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Records one event.
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Records an event, logging instead of propagating sink failures.
pub async fn emit(sink: &dyn AuditSink, event: AuditEvent) {
    if let Err(e) = sink.record(&event).await {
        warn!(
            error = %e,
            entity_kind = %event.entity_kind,
            entity_id = %event.entity_id,
            action = %event.action,
            "Failed to record audit event"
        );
    }
}

/// Writes audit events to the `tally::audit` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        info!(
            target: "tally::audit",
            organization_id = %event.organization_id,
            entity_kind = %event.entity_kind,
            entity_id = %event.entity_id,
            action = %event.action,
            actor = ?event.actor,
            "audit"
        );
        Ok(())
    }
}

/// Keeps audit events in memory; used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the recorded events.
    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }

    /// Returns the actions recorded for one entity, in order.
    pub async fn actions_for(&self, entity_id: impl Into<Uuid>) -> Vec<String> {
        let entity_id = entity_id.into();
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.entity_id == entity_id)
            .map(|e| e.action.clone())
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}
