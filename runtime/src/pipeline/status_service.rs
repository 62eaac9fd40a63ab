use std::sync::Arc;

use anyhow::Result;

use crate::storage::{DocumentRecord, DocumentType, FieldUpdates, MetadataStore};

use super::retry::RetryPolicy;

/// Stage-facing wrapper over the metadata store. Every lifecycle write goes
/// through one of the `mark_*` methods so the retry policy and the update
/// shape are the same for all stages.
#[derive(Clone)]
pub struct DocStatusService {
    store: Arc<dyn MetadataStore>,
    retry: RetryPolicy,
}

impl DocStatusService {
    pub fn new(store: Arc<dyn MetadataStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.store.clone()
    }

    pub async fn register(&self, record: DocumentRecord) -> Result<()> {
        let store = self.store.clone();
        self.retry
            .run("metadata create", || {
                let store = store.clone();
                let record = record.clone();
                async move { store.create(record).await.map_err(Into::into) }
            })
            .await
    }

    /// Registers a group of records atomically; a retried attempt sees the
    /// same state as the first one.
    pub async fn register_all(&self, records: Vec<DocumentRecord>) -> Result<()> {
        let store = self.store.clone();
        self.retry
            .run("metadata create", || {
                let store = store.clone();
                let records = records.clone();
                async move { store.create_all(records).await.map_err(Into::into) }
            })
            .await
    }

    pub async fn read(&self, doc_id: &str) -> Result<DocumentRecord> {
        let store = self.store.clone();
        self.retry
            .run("metadata read", || {
                let store = store.clone();
                async move { store.read(doc_id).await.map_err(Into::into) }
            })
            .await
    }

    pub async fn mark_text_extracted(
        &self,
        doc_id: &str,
        text_location: &str,
    ) -> Result<DocumentRecord> {
        self.apply(doc_id, FieldUpdates::text_extracted(text_location))
            .await
    }

    pub async fn mark_classified(
        &self,
        doc_id: &str,
        document_type: DocumentType,
    ) -> Result<DocumentRecord> {
        self.apply(doc_id, FieldUpdates::classified(document_type))
            .await
    }

    pub async fn mark_failed(&self, doc_id: &str, reason: &str) -> Result<DocumentRecord> {
        self.apply(doc_id, FieldUpdates::failed(reason)).await
    }

    async fn apply(&self, doc_id: &str, updates: FieldUpdates) -> Result<DocumentRecord> {
        let store = self.store.clone();
        self.retry
            .run("metadata update", || {
                let store = store.clone();
                let updates = updates.clone();
                async move { store.update(doc_id, updates).await.map_err(Into::into) }
            })
            .await
    }
}
