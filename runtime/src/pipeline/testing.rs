//! Fixtures shared by the stage tests.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use tempfile::TempDir;

use crate::{
    bus::{BatchConfig, Envelope, EventBus, InMemoryEventBus},
    storage::{
        ChangeEvent, DocStatus, DocumentRecord, FsObjectStore, JsonMetadataConfig,
        JsonMetadataStore, MetadataStore, ObjectStore, StorageLocation,
    },
};

use super::{
    extractor::TextExtractor,
    publisher::{EventPublisher, Topics},
    retry::RetryPolicy,
    status_service::DocStatusService,
};

pub const UPLOAD_BUCKET: &str = "uploads";
pub const PROCESSED_BUCKET: &str = "processed";

pub fn topics() -> Topics {
    Topics {
        internal: "text-ready".into(),
        user_notification: "user-notifications".into(),
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        jitter: 0.0,
        call_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

pub struct Harness {
    _dir: TempDir,
    pub store: Arc<JsonMetadataStore>,
    pub objects: Arc<FsObjectStore>,
    pub bus: Arc<InMemoryEventBus>,
    pub status: DocStatusService,
    pub publisher: EventPublisher,
}

impl Harness {
    pub async fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        let store = Arc::new(JsonMetadataStore::new(JsonMetadataConfig {
            working_dir: dir.path().join("meta"),
            table_name: "documents".into(),
            workspace: None,
            feed: BatchConfig::default(),
        }));
        store.initialize().await?;

        let objects = Arc::new(FsObjectStore::new(dir.path().join("objects")));
        objects.initialize().await?;

        let bus = Arc::new(InMemoryEventBus::new(BatchConfig {
            max_batch_size: 10,
            max_linger: Duration::from_millis(5),
        }));
        let status = DocStatusService::new(store.clone(), fast_retry());
        let publisher = EventPublisher::new(bus.clone(), topics(), fast_retry());

        Ok(Self {
            _dir: dir,
            store,
            objects,
            bus,
            status,
            publisher,
        })
    }

    /// Stores `content` under `key` and registers a `RECEIVED` record for it.
    pub async fn seed(&self, key: &str, content: &[u8]) -> Result<DocumentRecord> {
        self.objects
            .put(&StorageLocation::new(UPLOAD_BUCKET, key), content.to_vec())
            .await?;

        let record = DocumentRecord {
            document_id: uuid::Uuid::new_v4().to_string(),
            status: DocStatus::Received,
            source_bucket: UPLOAD_BUCKET.into(),
            source_key: key.into(),
            original_name: key.rsplit('/').next().unwrap_or(key).to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            size: content.len() as u64,
            extracted_text_location: None,
            document_type: None,
            failure_reason: None,
            updated_at: None,
        };
        self.store.create(record.clone()).await?;
        Ok(record)
    }

    pub fn insert_event(record: &DocumentRecord) -> ChangeEvent {
        ChangeEvent::insert(record)
    }

    /// Drains whatever has been published to `topic` so far.
    pub async fn published(&self, topic: &str) -> Vec<Envelope> {
        let mut batches = self.bus.subscribe(topic);
        match tokio::time::timeout(Duration::from_millis(100), batches.next()).await {
            Ok(Some(batch)) => batch,
            _ => Vec::new(),
        }
    }

    pub async fn publish_raw(&self, topic: &str, body: &str) -> Result<()> {
        self.bus
            .publish(
                topic,
                crate::bus::Message {
                    subject: None,
                    body: body.to_string(),
                },
            )
            .await?;
        Ok(())
    }
}

/// Extractor driven by a closure that counts its invocations.
pub struct FnExtractor<F> {
    calls: AtomicUsize,
    behavior: F,
}

impl<F> FnExtractor<F>
where
    F: Fn(&StorageLocation) -> Result<Vec<String>> + Send + Sync,
{
    pub fn new(behavior: F) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            behavior,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<F> TextExtractor for FnExtractor<F>
where
    F: Fn(&StorageLocation) -> Result<Vec<String>> + Send + Sync,
{
    async fn extract_lines(&self, source: &StorageLocation) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.behavior)(source)
    }
}
