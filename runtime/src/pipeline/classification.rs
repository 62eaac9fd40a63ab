use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::{
    bus::Envelope,
    storage::{DocumentType, ObjectStore, StorageLocation},
};

use super::{
    classifier::Classifier,
    error_reporter::ErrorReporter,
    events::{PipelineEvent, TextReadyEvent, UserNotification},
    outcome::{BatchReport, ItemOutcome},
    publisher::EventPublisher,
    retry::RetryPolicy,
    runner::{BatchHandler, BatchSettings, WorkItem, process_batch},
    status_service::DocStatusService,
};

/// Consumes text-ready events, assigns a document type and notifies the
/// user topic.
///
/// A failure here leaves the record at `TEXT_EXTRACTED`; it can be picked
/// up again through a reprocess request.
pub struct ClassificationStage {
    status: DocStatusService,
    objects: Arc<dyn ObjectStore>,
    classifier: Arc<dyn Classifier>,
    publisher: EventPublisher,
    processed_bucket: String,
    retry: RetryPolicy,
    batch: BatchSettings,
    reporter: ErrorReporter,
}

impl ClassificationStage {
    pub const NAME: &'static str = "classification";

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        status: DocStatusService,
        objects: Arc<dyn ObjectStore>,
        classifier: Arc<dyn Classifier>,
        publisher: EventPublisher,
        processed_bucket: impl Into<String>,
        retry: RetryPolicy,
        batch: BatchSettings,
    ) -> Self {
        Self {
            status,
            objects,
            classifier,
            publisher,
            processed_bucket: processed_bucket.into(),
            retry,
            batch,
            reporter: ErrorReporter::new(Self::NAME),
        }
    }

    async fn process_envelope(&self, envelope: Envelope) -> ItemOutcome {
        let event = match TextReadyEvent::from_envelope(&envelope) {
            Ok(event) => event,
            Err(err) => {
                self.reporter
                    .skipped(&envelope.message_id, &envelope.body, &err);
                return ItemOutcome::skipped(err);
            }
        };

        match self.classify_and_notify(&event).await {
            Ok(document_type) => {
                info!(
                    doc_id = %event.document_id,
                    document_type = %document_type,
                    "document classified"
                );
                ItemOutcome::Processed
            }
            Err(err) => {
                self.reporter
                    .failed(&event.document_id, &envelope.body, &err);
                ItemOutcome::failed(format!("{err:#}"))
            }
        }
    }

    async fn classify_and_notify(&self, event: &TextReadyEvent) -> Result<DocumentType> {
        let location = StorageLocation::new(&self.processed_bucket, &event.extracted_text_location);
        let bytes = self
            .retry
            .run("text fetch", || self.objects.get(&location))
            .await?;
        let text = String::from_utf8_lossy(&bytes);

        let document_type = self.classifier.classify(&text);
        self.status
            .mark_classified(&event.document_id, document_type)
            .await?;

        self.publisher
            .publish(PipelineEvent::DocumentClassified(
                UserNotification::classified(
                    &event.original_name,
                    &event.document_id,
                    document_type,
                ),
            ))
            .await?;

        Ok(document_type)
    }
}

#[async_trait]
impl BatchHandler<Envelope> for ClassificationStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn handle_batch(&self, batch: Vec<Envelope>) -> BatchReport {
        let items = batch
            .into_iter()
            .map(|envelope| WorkItem {
                id: envelope.message_id.clone(),
                raw: envelope.body.clone(),
                payload: envelope,
            })
            .collect();

        process_batch(Self::NAME, items, &self.batch, |envelope| {
            self.process_envelope(envelope)
        })
        .await
    }
}
