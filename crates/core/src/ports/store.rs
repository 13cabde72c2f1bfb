//! Repository port for tenant-scoped documents.

use async_trait::async_trait;
use chrono::Utc;
use tally_shared::AppError;
use tally_shared::types::{OrganizationId, PageRequest, PageResponse};
use thiserror::Error;
use uuid::Uuid;

use crate::documents::{Document, DocumentError, DocumentKind};

/// Page size used when a caller needs every matching document.
pub const FIND_ALL_PAGE_SIZE: u32 = 200;

/// Result type alias for repository operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by repositories.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Document does not exist in the organization.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Document kind.
        kind: DocumentKind,
        /// Requested ID.
        id: Uuid,
    },

    /// Save refused because the document violates an invariant.
    #[error("Refusing to save {kind} {id}: {source}")]
    Invariant {
        /// Document kind.
        kind: DocumentKind,
        /// Document ID.
        id: Uuid,
        /// Violated invariant.
        #[source]
        source: DocumentError,
    },

    /// The ID is already taken by a document of another organization or
    /// kind.
    #[error("{kind} {id} conflicts with an existing document")]
    Conflict {
        /// Document kind.
        kind: DocumentKind,
        /// Document ID.
        id: Uuid,
    },

    /// Backend failure (connection, query, constraint).
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Stored body could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::Invariant { .. } | Self::Backend(_) | Self::Serialization(_) => 500,
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::Invariant { .. } => "INVARIANT_VIOLATION",
            Self::Backend(_) => "STORAGE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Builds a `NotFound` for a document type.
    pub fn not_found<T: Document>(id: T::Id) -> Self {
        Self::NotFound {
            kind: T::KIND,
            id: id.into(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::NotFound(err.to_string()),
            StoreError::Conflict { .. } => Self::Conflict(err.to_string()),
            StoreError::Invariant { .. } => Self::Consistency(err.to_string()),
            StoreError::Backend(msg) | StoreError::Serialization(msg) => Self::Database(msg),
        }
    }
}

/// Recomputes derived fields and checks invariants before a save.
///
/// Every repository implementation calls this first so a stale in-memory
/// copy can never overwrite consistent derived state.
///
/// # Errors
///
/// Returns `StoreError::Invariant` if the recomputed document is inconsistent.
pub fn prepare_for_save<T: Document>(document: T) -> StoreResult<T> {
    let document = document.recompute_derived(Utc::now().date_naive());
    document
        .check_invariants()
        .map_err(|source| StoreError::Invariant {
            kind: T::KIND,
            id: document.id().into(),
            source,
        })?;
    Ok(document)
}

/// Tenant-scoped persistence for one document type.
///
/// Every read takes the organization explicitly; a document belonging to
/// another organization is reported as missing.
#[async_trait]
pub trait Repository<T: Document>: Send + Sync {
    /// Loads a document by ID.
    async fn find_by_id(&self, organization_id: OrganizationId, id: T::Id) -> StoreResult<Option<T>>;

    /// Returns one page of documents matching the filter, ordered by
    /// document date then ID.
    async fn find(
        &self,
        organization_id: OrganizationId,
        filter: &T::Filter,
        page: PageRequest,
    ) -> StoreResult<PageResponse<T>>;

    /// Upserts a document after recomputing derived fields.
    ///
    /// Returns the document as stored.
    async fn save(&self, document: T) -> StoreResult<T>;

    /// Counts documents matching the filter.
    async fn count(&self, organization_id: OrganizationId, filter: &T::Filter) -> StoreResult<u64>;

    /// Loads a document, failing if it does not exist.
    async fn get(&self, organization_id: OrganizationId, id: T::Id) -> StoreResult<T> {
        self.find_by_id(organization_id, id)
            .await?
            .ok_or_else(|| StoreError::not_found::<T>(id))
    }

    /// Returns every matching document, paging through the store.
    async fn find_all(&self, organization_id: OrganizationId, filter: &T::Filter) -> StoreResult<Vec<T>> {
        let mut page = PageRequest::new(1, FIND_ALL_PAGE_SIZE);
        let mut documents = Vec::new();
        loop {
            let response = self.find(organization_id, filter, page).await?;
            let has_more = response.has_more();
            documents.extend(response.data);
            if !has_more {
                break;
            }
            page = page.next();
        }
        Ok(documents)
    }
}
