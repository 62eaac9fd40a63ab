use anyhow::{Context, Result};
use tracing::info;
use uuid::Uuid;

use crate::storage::{DocStatus, DocumentRecord};

use super::{
    events::{UploadNotification, UploadedObject},
    status_service::DocStatusService,
};

/// Mints a fresh 128-bit random document id.
pub fn new_document_id() -> String {
    Uuid::new_v4().to_string()
}

/// Registers uploaded objects as `RECEIVED` records. Nothing is published:
/// the extraction stage learns about new records from the store's change
/// feed.
#[derive(Clone)]
pub struct IntakeStage {
    status: DocStatusService,
}

impl IntakeStage {
    pub fn new(status: DocStatusService) -> Self {
        Self { status }
    }

    /// Handles a raw upload notification. Any failure is returned to the
    /// caller so the trigger can be retried.
    pub async fn handle_raw(&self, raw: &str) -> Result<Vec<String>> {
        let notification = UploadNotification::parse(raw).context("invalid upload notification")?;
        self.handle(&notification).await
    }

    /// Registers every object of the notification in one atomic write, so a
    /// failed call leaves nothing behind for the retried trigger to duplicate.
    pub async fn handle(&self, notification: &UploadNotification) -> Result<Vec<String>> {
        let objects = notification
            .objects()
            .context("invalid upload notification")?;

        let records: Vec<DocumentRecord> = objects.iter().map(received_record).collect();
        let ids: Vec<String> = records.iter().map(|r| r.document_id.clone()).collect();

        self.status
            .register_all(records)
            .await
            .with_context(|| format!("failed to register {} uploaded object(s)", objects.len()))?;

        for (object, doc_id) in objects.iter().zip(&ids) {
            info!(doc_id = %doc_id, key = %object.key, size = object.size, "document registered");
        }
        Ok(ids)
    }

    pub async fn register(&self, object: &UploadedObject) -> Result<String> {
        let record = received_record(object);
        let doc_id = record.document_id.clone();

        self.status
            .register(record)
            .await
            .with_context(|| format!("failed to register {}/{}", object.bucket, object.key))?;

        info!(doc_id = %doc_id, key = %object.key, size = object.size, "document registered");
        Ok(doc_id)
    }
}

fn received_record(object: &UploadedObject) -> DocumentRecord {
    DocumentRecord {
        document_id: new_document_id(),
        status: DocStatus::Received,
        source_bucket: object.bucket.clone(),
        source_key: object.key.clone(),
        original_name: object.original_name(),
        created_at: chrono::Utc::now().to_rfc3339(),
        size: object.size,
        extracted_text_location: None,
        document_type: None,
        failure_reason: None,
        updated_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashSet, sync::Arc};

    use crate::{
        bus::BatchConfig,
        pipeline::retry::RetryPolicy,
        storage::{JsonMetadataConfig, JsonMetadataStore, MetadataStore},
    };
    use tempfile::TempDir;

    async fn stage(dir: &TempDir) -> (IntakeStage, Arc<JsonMetadataStore>) {
        let store = Arc::new(JsonMetadataStore::new(JsonMetadataConfig {
            working_dir: dir.path().into(),
            table_name: "documents".into(),
            workspace: None,
            feed: BatchConfig::default(),
        }));
        store.initialize().await.expect("init store");
        let status = DocStatusService::new(store.clone(), RetryPolicy::no_retry());
        (IntakeStage::new(status), store)
    }

    #[test]
    fn ten_thousand_ids_do_not_collide() {
        let ids: HashSet<String> = (0..10_000).map(|_| new_document_id()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[tokio::test]
    async fn registers_decoded_upload() -> Result<()> {
        let dir = TempDir::new()?;
        let (intake, store) = stage(&dir).await;

        let raw = r#"{"Records":[{"s3":{"bucket":{"name":"uploads"},
            "object":{"key":"Invoices/Q1+report.pdf","size":2048}}}]}"#;
        let ids = intake.handle_raw(raw).await?;
        assert_eq!(ids.len(), 1);

        let record = store.read(&ids[0]).await?;
        assert_eq!(record.status, DocStatus::Received);
        assert_eq!(record.original_name, "Q1 report.pdf");
        assert_eq!(record.source_key, "Invoices/Q1 report.pdf");
        assert_eq!(record.source_bucket, "uploads");
        assert_eq!(record.size, 2048);
        assert!(record.extracted_text_location.is_none());
        assert!(record.failure_reason.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn same_upload_twice_mints_two_records() -> Result<()> {
        let dir = TempDir::new()?;
        let (intake, store) = stage(&dir).await;
        let object = UploadedObject {
            bucket: "uploads".into(),
            key: "a.png".into(),
            size: 1,
        };

        let first = intake.register(&object).await?;
        let second = intake.register(&object).await?;
        assert_ne!(first, second);
        assert_eq!(store.list_by_status(DocStatus::Received).await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn failed_multi_record_upload_leaves_nothing_to_duplicate() -> Result<()> {
        let dir = TempDir::new()?;
        let (intake, store) = stage(&dir).await;
        let raw = r#"{"Records":[
            {"s3":{"bucket":{"name":"uploads"},"object":{"key":"a.pdf","size":1}}},
            {"s3":{"bucket":{"name":"uploads"},"object":{"key":"b.pdf","size":2}}}]}"#;

        // a directory in place of the table file makes the flush fail
        std::fs::create_dir_all(store.file_path().join("occupied"))?;
        assert!(intake.handle_raw(raw).await.is_err());
        assert!(store.status_counts().await?.is_empty());

        std::fs::remove_dir_all(store.file_path())?;
        let ids = intake.handle_raw(raw).await?;
        assert_eq!(ids.len(), 2);

        let mut names: Vec<String> = store
            .list_by_status(DocStatus::Received)
            .await?
            .into_iter()
            .map(|record| record.original_name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.pdf", "b.pdf"]);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_notification_is_an_error_and_writes_nothing() -> Result<()> {
        let dir = TempDir::new()?;
        let (intake, store) = stage(&dir).await;

        assert!(intake.handle_raw(r#"{"Records":"nope"}"#).await.is_err());
        assert!(intake.handle_raw(r#"{"Records":[]}"#).await.is_err());
        assert!(store.status_counts().await?.is_empty());
        Ok(())
    }
}
