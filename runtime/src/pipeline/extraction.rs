use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{error, info};

use crate::storage::{
    ChangeEvent, DocStatus, ObjectStore, StorageLocation, record::attr,
};

use super::{
    error_reporter::ErrorReporter,
    events::{InsertedDocument, PipelineEvent, TextReadyEvent},
    extractor::{TextExtractor, join_lines},
    file_types::{SupportedTypes, text_key_for},
    outcome::{BatchReport, ItemOutcome},
    publisher::EventPublisher,
    retry::RetryPolicy,
    runner::{BatchHandler, BatchSettings, WorkItem, process_batch},
    status_service::DocStatusService,
};

pub const UNSUPPORTED_FILE_TYPE: &str = "unsupported file type";

/// Reacts to record insertions: extracts text, stores it, advances the
/// record to `TEXT_EXTRACTED` and announces it on the internal topic.
///
/// Any failure after the allow-list check moves the record to `FAILED`
/// with the error text; there is no automatic retry for those.
pub struct ExtractionStage {
    status: DocStatusService,
    objects: Arc<dyn ObjectStore>,
    extractor: Arc<dyn TextExtractor>,
    publisher: EventPublisher,
    supported: SupportedTypes,
    processed_bucket: String,
    retry: RetryPolicy,
    batch: BatchSettings,
    reporter: ErrorReporter,
}

impl ExtractionStage {
    pub const NAME: &'static str = "extraction";

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        status: DocStatusService,
        objects: Arc<dyn ObjectStore>,
        extractor: Arc<dyn TextExtractor>,
        publisher: EventPublisher,
        supported: SupportedTypes,
        processed_bucket: impl Into<String>,
        retry: RetryPolicy,
        batch: BatchSettings,
    ) -> Self {
        Self {
            status,
            objects,
            extractor,
            publisher,
            supported,
            processed_bucket: processed_bucket.into(),
            retry,
            batch,
            reporter: ErrorReporter::new(Self::NAME),
        }
    }

    async fn process_change(&self, raw: String, event: ChangeEvent) -> ItemOutcome {
        let doc = match InsertedDocument::from_change(&event) {
            Ok(Some(doc)) => doc,
            Ok(None) => return ItemOutcome::skipped("not an insertion"),
            Err(err) => {
                self.reporter.skipped("change-event", &raw, &err);
                return ItemOutcome::skipped(err);
            }
        };
        let doc_id = doc.document_id.clone();

        // Redelivered insertions find the record already advanced.
        match self.status.read(&doc_id).await {
            Ok(current) if current.status != DocStatus::Received => {
                return ItemOutcome::skipped(format!("already {}", current.status));
            }
            Ok(_) => {}
            Err(err) => {
                self.reporter.failed(&doc_id, &raw, &err);
                return ItemOutcome::failed(format!("{err:#}"));
            }
        }

        if !self.supported.is_supported(&doc.key) {
            return match self.status.mark_failed(&doc_id, UNSUPPORTED_FILE_TYPE).await {
                Ok(_) => {
                    info!(doc_id = %doc_id, key = %doc.key, "unsupported file type");
                    ItemOutcome::failed(UNSUPPORTED_FILE_TYPE)
                }
                Err(err) => {
                    self.reporter.failed(&doc_id, &raw, &err);
                    ItemOutcome::failed(format!("{err:#}"))
                }
            };
        }

        match self.extract_and_publish(&doc).await {
            Ok(text_key) => {
                info!(doc_id = %doc_id, text_key = %text_key, "text extracted");
                ItemOutcome::Processed
            }
            Err(err) => {
                self.reporter.failed(&doc_id, &raw, &err);
                let reason = format!("{err:#}");
                if let Err(mark_err) = self.status.mark_failed(&doc_id, &reason).await {
                    error!(
                        doc_id = %doc_id,
                        error = %mark_err,
                        "failed to mark document as failed"
                    );
                }
                ItemOutcome::failed(reason)
            }
        }
    }

    async fn extract_and_publish(&self, doc: &InsertedDocument) -> Result<String> {
        let source = StorageLocation::new(&doc.bucket, &doc.key);
        let lines = self
            .retry
            .run("text extraction", || self.extractor.extract_lines(&source))
            .await?;
        let blob = join_lines(&lines);

        let text_key = text_key_for(&doc.document_id);
        let target = StorageLocation::new(&self.processed_bucket, &text_key);
        self.retry
            .run("text upload", || {
                self.objects.put(&target, blob.clone().into_bytes())
            })
            .await?;

        self.status
            .mark_text_extracted(&doc.document_id, &text_key)
            .await?;

        self.publisher
            .publish(PipelineEvent::TextReady(TextReadyEvent {
                document_id: doc.document_id.clone(),
                extracted_text_location: text_key.clone(),
                original_name: doc.original_name.clone(),
            }))
            .await?;

        Ok(text_key)
    }
}

#[async_trait]
impl BatchHandler<ChangeEvent> for ExtractionStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn handle_batch(&self, batch: Vec<ChangeEvent>) -> BatchReport {
        let items = batch
            .into_iter()
            .enumerate()
            .map(|(index, event)| {
                let id = event
                    .new_image
                    .get(attr::DOCUMENT_ID)
                    .cloned()
                    .unwrap_or_else(|| format!("change-{index}"));
                let raw = serde_json::to_string(&event).unwrap_or_else(|_| format!("{event:?}"));
                WorkItem {
                    id,
                    raw: raw.clone(),
                    payload: (raw, event),
                }
            })
            .collect();

        process_batch(Self::NAME, items, &self.batch, |(raw, event)| {
            self.process_change(raw, event)
        })
        .await
    }
}
