//! Document repository backed by the recon_documents table.

use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, Set,
};
use tally_core::documents::Document;
use tally_core::ports::{Repository, StoreError, StoreResult, prepare_for_save};
use tally_shared::types::{OrganizationId, PageRequest, PageResponse};
use tracing::debug;
use uuid::Uuid;

use crate::entities::recon_documents;

/// Repository for one document type.
///
/// Filters are evaluated on the deserialized documents after the query has
/// been narrowed by organization, kind and customer.
#[derive(Debug, Clone)]
pub struct DocumentRepository<T> {
    db: DatabaseConnection,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Document> DocumentRepository<T> {
    /// Creates a new document repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            _kind: PhantomData,
        }
    }

    async fn matching(&self, organization_id: OrganizationId, filter: &T::Filter) -> StoreResult<Vec<T>> {
        let mut query = recon_documents::Entity::find()
            .filter(recon_documents::Column::OrganizationId.eq(Uuid::from(organization_id)))
            .filter(recon_documents::Column::Kind.eq(T::KIND.as_str()));
        if let Some(customer_id) = T::filter_customer(filter) {
            query = query.filter(recon_documents::Column::CustomerId.eq(Uuid::from(customer_id)));
        }

        let rows = query
            .order_by_asc(recon_documents::Column::DocumentDate)
            .order_by_asc(recon_documents::Column::Id)
            .all(&self.db)
            .await
            .map_err(backend)?;

        let mut found = Vec::with_capacity(rows.len());
        for row in rows {
            let document = decode::<T>(row)?;
            if document.matches(filter) {
                found.push(document);
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl<T: Document> Repository<T> for DocumentRepository<T> {
    async fn find_by_id(&self, organization_id: OrganizationId, id: T::Id) -> StoreResult<Option<T>> {
        recon_documents::Entity::find_by_id(id.into())
            .filter(recon_documents::Column::OrganizationId.eq(Uuid::from(organization_id)))
            .filter(recon_documents::Column::Kind.eq(T::KIND.as_str()))
            .one(&self.db)
            .await
            .map_err(backend)?
            .map(decode::<T>)
            .transpose()
    }

    async fn find(
        &self,
        organization_id: OrganizationId,
        filter: &T::Filter,
        page: PageRequest,
    ) -> StoreResult<PageResponse<T>> {
        let found = self.matching(organization_id, filter).await?;
        Ok(PageResponse::from_vec(found, page))
    }

    async fn save(&self, document: T) -> StoreResult<T> {
        let document = prepare_for_save(document)?;
        let body = serde_json::to_value(&document).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let now = Utc::now().into();

        let row = recon_documents::ActiveModel {
            id: Set(document.id().into()),
            organization_id: Set(document.organization_id().into()),
            kind: Set(T::KIND.as_str().to_string()),
            customer_id: Set(document.customer_id().map(Uuid::from)),
            status: Set(document.status_label().to_string()),
            document_date: Set(document.document_date()),
            body: Set(body),
            created_at: Set(now),
            updated_at: Set(now),
        };

        // The organization and kind of an existing row never change; a row
        // owned by another tenant or kind is left untouched.
        let written = recon_documents::Entity::insert(row)
            .on_conflict(
                OnConflict::column(recon_documents::Column::Id)
                    .update_columns([
                        recon_documents::Column::CustomerId,
                        recon_documents::Column::Status,
                        recon_documents::Column::DocumentDate,
                        recon_documents::Column::Body,
                        recon_documents::Column::UpdatedAt,
                    ])
                    .action_and_where(Expr::cust(
                        "recon_documents.organization_id = excluded.organization_id \
                         AND recon_documents.kind = excluded.kind",
                    ))
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .map_err(backend)?;
        if written == 0 {
            return Err(StoreError::Conflict {
                kind: T::KIND,
                id: document.id().into(),
            });
        }

        debug!(kind = %T::KIND, id = %document.id(), "Document saved");
        Ok(document)
    }

    async fn count(&self, organization_id: OrganizationId, filter: &T::Filter) -> StoreResult<u64> {
        Ok(self.matching(organization_id, filter).await?.len() as u64)
    }

    // One query instead of one full scan per page.
    async fn find_all(&self, organization_id: OrganizationId, filter: &T::Filter) -> StoreResult<Vec<T>> {
        self.matching(organization_id, filter).await
    }
}

fn decode<T: Document>(row: recon_documents::Model) -> StoreResult<T> {
    serde_json::from_value(row.body)
        .map_err(|e| StoreError::Serialization(format!("{} {}: {e}", T::KIND, row.id)))
}

pub(crate) fn backend(err: DbErr) -> StoreError {
    StoreError::Backend(err.to_string())
}
