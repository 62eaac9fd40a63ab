use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use docflow::{
    bus::{BatchConfig, InMemoryEventBus},
    pipeline::{
        BatchSettings, Collaborators, KeywordClassifier, Notifier, Pipeline, PipelineConfig,
        RetryPolicy, SupportedTypes, TextExtractor, Topics, UserNotification,
    },
    storage::{
        DocStatus, DocumentType, FsObjectStore, JsonMetadataConfig, JsonMetadataStore,
        MetadataStore, ObjectStore, StorageLocation,
    },
};
use tempfile::TempDir;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

struct FixedExtractor(Vec<&'static str>);

#[async_trait]
impl TextExtractor for FixedExtractor {
    async fn extract_lines(&self, _source: &StorageLocation) -> Result<Vec<String>> {
        Ok(self.0.iter().map(|line| line.to_string()).collect())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    seen: Mutex<Vec<UserNotification>>,
    arrived: Notify,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &UserNotification) -> Result<()> {
        self.seen.lock().await.push(notification.clone());
        self.arrived.notify_one();
        Ok(())
    }
}

struct Fixture {
    _dir: TempDir,
    store: Arc<JsonMetadataStore>,
    objects: Arc<FsObjectStore>,
    notifier: Arc<RecordingNotifier>,
    pipeline: Pipeline,
}

async fn fixture(extractor: FixedExtractor) -> Result<Fixture> {
    let dir = TempDir::new()?;
    let feed = BatchConfig {
        max_batch_size: 10,
        max_linger: Duration::from_millis(5),
    };

    let store = Arc::new(JsonMetadataStore::new(JsonMetadataConfig {
        working_dir: dir.path().join("metadata"),
        table_name: "documents".into(),
        workspace: None,
        feed,
    }));
    store.initialize().await?;
    let objects = Arc::new(FsObjectStore::new(dir.path().join("objects")));
    objects.initialize().await?;
    let notifier = Arc::new(RecordingNotifier::default());

    let pipeline = Pipeline::new(
        Collaborators {
            store: store.clone(),
            objects: objects.clone(),
            bus: Arc::new(InMemoryEventBus::new(feed)),
            extractor: Arc::new(extractor),
            classifier: Arc::new(KeywordClassifier::default()),
            notifier: notifier.clone(),
        },
        PipelineConfig {
            processed_bucket: "processed".into(),
            topics: Topics {
                internal: "text-ready".into(),
                user_notification: "user-notifications".into(),
            },
            retry: RetryPolicy {
                initial_delay: Duration::from_millis(1),
                jitter: 0.0,
                ..RetryPolicy::default()
            },
            batch: BatchSettings::default(),
            supported: SupportedTypes::default(),
        },
    );

    Ok(Fixture {
        _dir: dir,
        store,
        objects,
        notifier,
        pipeline,
    })
}

async fn wait_for_status(
    store: &JsonMetadataStore,
    id: &str,
    status: DocStatus,
) -> Result<docflow::storage::DocumentRecord> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let record = store.read(id).await?;
            if record.status == status {
                return Ok::<_, anyhow::Error>(record);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?
}

#[tokio::test]
async fn invoice_upload_flows_to_user_notification() -> Result<()> {
    let fx = fixture(FixedExtractor(vec!["INVOICE #123"])).await?;
    let cancel = CancellationToken::new();
    let stages = fx.pipeline.spawn(cancel.clone());

    let raw = r#"{"Records":[{"s3":{"bucket":{"name":"uploads"},
        "object":{"key":"Invoices/Q1+report.pdf","size":2048}}}]}"#;
    let ids = fx.pipeline.intake().handle_raw(raw).await?;
    assert_eq!(ids.len(), 1);
    let id = &ids[0];

    let registered = fx.store.read(id).await?;
    assert_eq!(registered.original_name, "Q1 report.pdf");
    assert_eq!(registered.size, 2048);

    let classified = wait_for_status(&fx.store, id, DocStatus::Classified).await?;
    assert_eq!(classified.document_type, Some(DocumentType::Invoice));
    assert_eq!(
        classified.extracted_text_location.as_deref(),
        Some(format!("{id}.txt").as_str())
    );

    let text = fx
        .objects
        .get(&StorageLocation::new("processed", &format!("{id}.txt")))
        .await?;
    assert_eq!(text, b"INVOICE #123\n");

    tokio::time::timeout(Duration::from_secs(5), async {
        while fx.notifier.seen.lock().await.is_empty() {
            fx.notifier.arrived.notified().await;
        }
    })
    .await?;
    let seen = fx.notifier.seen.lock().await.clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].subject, "Document Classified: Q1 report.pdf");
    assert!(seen[0].body.contains("Detected Type: INVOICE"));
    assert!(seen[0].body.contains(id.as_str()));

    cancel.cancel();
    for stage in stages {
        stage.await?;
    }
    Ok(())
}

#[tokio::test]
async fn unsupported_upload_ends_failed_without_notification() -> Result<()> {
    let fx = fixture(FixedExtractor(vec!["INVOICE"])).await?;
    let cancel = CancellationToken::new();
    let stages = fx.pipeline.spawn(cancel.clone());

    let raw = r#"{"Records":[{"s3":{"bucket":{"name":"uploads"},
        "object":{"key":"notes.docx","size":10}}}]}"#;
    let ids = fx.pipeline.intake().handle_raw(raw).await?;

    let failed = wait_for_status(&fx.store, &ids[0], DocStatus::Failed).await?;
    assert_eq!(failed.failure_reason.as_deref(), Some("unsupported file type"));

    // give the later stages a chance to (wrongly) react
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(fx.notifier.seen.lock().await.is_empty());

    cancel.cancel();
    for stage in stages {
        stage.await?;
    }
    Ok(())
}
