//! GL posting outbox backed by the recon_gl_postings table.
//!
//! Settlement postings are written here and exported to the general
//! ledger by a separate job.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, Set,
};
use tally_core::ports::{GatewayError, GlGateway};
use tally_core::settlement::GlPosting;
use tally_shared::types::OrganizationId;
use tracing::info;
use uuid::Uuid;

use crate::entities::recon_gl_postings;

/// Outbox of balanced settlement postings.
#[derive(Debug, Clone)]
pub struct GlOutboxRepository {
    db: DatabaseConnection,
}

impl GlOutboxRepository {
    /// Creates a new outbox repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Returns postings not yet exported, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn pending(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<recon_gl_postings::Model>, DbErr> {
        recon_gl_postings::Entity::find()
            .filter(recon_gl_postings::Column::OrganizationId.eq(Uuid::from(organization_id)))
            .filter(recon_gl_postings::Column::ExportedAt.is_null())
            .order_by_asc(recon_gl_postings::Column::CreatedAt)
            .all(&self.db)
            .await
    }

    /// Marks a posting as exported.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub async fn mark_exported(&self, settlement_id: Uuid) -> Result<bool, DbErr> {
        let result = recon_gl_postings::Entity::update_many()
            .col_expr(
                recon_gl_postings::Column::ExportedAt,
                Expr::value(Utc::now()),
            )
            .filter(recon_gl_postings::Column::SettlementId.eq(settlement_id))
            .filter(recon_gl_postings::Column::ExportedAt.is_null())
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }
}

#[async_trait]
impl GlGateway for GlOutboxRepository {
    async fn submit(&self, posting: &GlPosting) -> Result<(), GatewayError> {
        let lines = serde_json::to_value(&posting.lines).map_err(|e| GatewayError(e.to_string()))?;

        let row = recon_gl_postings::ActiveModel {
            settlement_id: Set(posting.settlement.id.into()),
            organization_id: Set(posting.organization_id.into()),
            settlement_number: Set(posting.settlement.number.clone()),
            customer_id: Set(posting.customer_id.into()),
            currency: Set(posting.currency.to_string()),
            posting_date: Set(posting.posting_date),
            total_debits: Set(posting.total_debits()),
            total_credits: Set(posting.total_credits()),
            lines: Set(lines),
            exported_at: Set(None),
            created_at: Set(Utc::now().into()),
        };

        // Resubmitting a settlement leaves the first posting in place.
        recon_gl_postings::Entity::insert(row)
            .on_conflict(
                OnConflict::column(recon_gl_postings::Column::SettlementId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .map_err(|e| GatewayError(e.to_string()))?;

        info!(
            settlement_id = %posting.settlement.id,
            settlement_number = %posting.settlement.number,
            lines = posting.lines.len(),
            "GL posting queued"
        );
        Ok(())
    }
}
