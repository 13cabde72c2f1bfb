//! In-memory repository used by tests and the dry-run batch mode.

use std::collections::HashMap;

use async_trait::async_trait;
use tally_shared::types::{OrganizationId, PageRequest, PageResponse};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::store::{Repository, StoreError, StoreResult, prepare_for_save};
use crate::documents::Document;

/// Repository backed by a map, keyed by document ID.
#[derive(Debug)]
pub struct MemoryStore<T: Document> {
    documents: RwLock<HashMap<Uuid, T>>,
}

impl<T: Document> Default for MemoryStore<T> {
    fn default() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Document> MemoryStore<T> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents across all organizations.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    /// Returns true if the store holds no documents.
    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    async fn matching(&self, organization_id: OrganizationId, filter: &T::Filter) -> Vec<T> {
        let documents = self.documents.read().await;
        let mut found: Vec<T> = documents
            .values()
            .filter(|d| d.organization_id() == organization_id && d.matches(filter))
            .cloned()
            .collect();
        found.sort_by_key(|d| (d.document_date(), Into::<Uuid>::into(d.id())));
        found
    }
}

#[async_trait]
impl<T: Document> Repository<T> for MemoryStore<T> {
    async fn find_by_id(&self, organization_id: OrganizationId, id: T::Id) -> StoreResult<Option<T>> {
        let documents = self.documents.read().await;
        Ok(documents
            .get(&id.into())
            .filter(|d| d.organization_id() == organization_id)
            .cloned())
    }

    async fn find(
        &self,
        organization_id: OrganizationId,
        filter: &T::Filter,
        page: PageRequest,
    ) -> StoreResult<PageResponse<T>> {
        let found = self.matching(organization_id, filter).await;
        Ok(PageResponse::from_vec(found, page))
    }

    async fn save(&self, document: T) -> StoreResult<T> {
        let document = prepare_for_save(document)?;
        let mut documents = self.documents.write().await;
        let id: Uuid = document.id().into();
        if documents
            .get(&id)
            .is_some_and(|existing| existing.organization_id() != document.organization_id())
        {
            return Err(StoreError::Conflict { kind: T::KIND, id });
        }
        documents.insert(id, document.clone());
        Ok(document)
    }

    async fn count(&self, organization_id: OrganizationId, filter: &T::Filter) -> StoreResult<u64> {
        Ok(self.matching(organization_id, filter).await.len() as u64)
    }

    async fn find_all(&self, organization_id: OrganizationId, filter: &T::Filter) -> StoreResult<Vec<T>> {
        Ok(self.matching(organization_id, filter).await)
    }
}
