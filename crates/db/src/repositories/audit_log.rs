//! Audit log repository backed by the recon_audit_events table.

use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use tally_core::ports::{AuditError, AuditEvent, AuditSink};
use tally_shared::types::OrganizationId;
use uuid::Uuid;

use crate::entities::recon_audit_events;

/// Append-only audit event storage.
#[derive(Debug, Clone)]
pub struct AuditLogRepository {
    db: DatabaseConnection,
}

impl AuditLogRepository {
    /// Creates a new audit log repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Returns the events recorded for one entity, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn events_for(
        &self,
        organization_id: OrganizationId,
        entity_id: Uuid,
    ) -> Result<Vec<recon_audit_events::Model>, DbErr> {
        recon_audit_events::Entity::find()
            .filter(recon_audit_events::Column::OrganizationId.eq(Uuid::from(organization_id)))
            .filter(recon_audit_events::Column::EntityId.eq(entity_id))
            .order_by_asc(recon_audit_events::Column::OccurredAt)
            .all(&self.db)
            .await
    }
}

#[async_trait]
impl AuditSink for AuditLogRepository {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        recon_audit_events::ActiveModel {
            id: Set(Uuid::now_v7()),
            organization_id: Set(event.organization_id.into()),
            entity_kind: Set(event.entity_kind.as_str().to_string()),
            entity_id: Set(event.entity_id),
            action: Set(event.action.clone()),
            actor_id: Set(event.actor.map(Uuid::from)),
            before: Set(event.before.clone()),
            after: Set(event.after.clone()),
            occurred_at: Set(event.occurred_at.into()),
        }
        .insert(&self.db)
        .await
        .map(|_| ())
        .map_err(|e| AuditError(e.to_string()))
    }
}
