use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    bus::{Envelope, EventBus},
    storage::{ChangeEvent, DocStatus, MetadataStore, ObjectStore, StoreError},
};

use super::{
    classification::ClassificationStage,
    classifier::Classifier,
    events::{PipelineEvent, TextReadyEvent},
    extraction::ExtractionStage,
    extractor::TextExtractor,
    file_types::SupportedTypes,
    intake::IntakeStage,
    notifier::{NotificationStage, Notifier},
    outcome::BatchReport,
    publisher::{EventPublisher, Topics},
    retry::RetryPolicy,
    runner::{BatchHandler, BatchSettings, spawn_stage},
    status_service::DocStatusService,
};

/// External clients, created once at process start and shared by every
/// stage.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn MetadataStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub bus: Arc<dyn EventBus>,
    pub extractor: Arc<dyn TextExtractor>,
    pub classifier: Arc<dyn Classifier>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub processed_bucket: String,
    pub topics: Topics,
    pub retry: RetryPolicy,
    pub batch: BatchSettings,
    pub supported: SupportedTypes,
}

#[derive(Debug, Error)]
pub enum ReprocessError {
    #[error("document {0} not found")]
    NotFound(String),

    #[error("document {document_id} is {status}; only TEXT_EXTRACTED documents can be reprocessed")]
    NotReprocessable {
        document_id: String,
        status: DocStatus,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub struct Pipeline {
    store: Arc<dyn MetadataStore>,
    bus: Arc<dyn EventBus>,
    topics: Topics,
    status: DocStatusService,
    publisher: EventPublisher,
    intake: IntakeStage,
    extraction: Arc<ExtractionStage>,
    classification: Arc<ClassificationStage>,
    notification: Arc<NotificationStage>,
}

impl Pipeline {
    pub fn new(collaborators: Collaborators, config: PipelineConfig) -> Self {
        let Collaborators {
            store,
            objects,
            bus,
            extractor,
            classifier,
            notifier,
        } = collaborators;
        let PipelineConfig {
            processed_bucket,
            topics,
            retry,
            batch,
            supported,
        } = config;

        let status = DocStatusService::new(store.clone(), retry.clone());
        let publisher = EventPublisher::new(bus.clone(), topics.clone(), retry.clone());

        let extraction = Arc::new(ExtractionStage::new(
            status.clone(),
            objects.clone(),
            extractor,
            publisher.clone(),
            supported,
            processed_bucket.clone(),
            retry.clone(),
            batch.clone(),
        ));
        let classification = Arc::new(ClassificationStage::new(
            status.clone(),
            objects,
            classifier,
            publisher.clone(),
            processed_bucket,
            retry,
            batch.clone(),
        ));
        let notification = Arc::new(NotificationStage::new(notifier, batch));

        Self {
            store,
            bus,
            topics,
            intake: IntakeStage::new(status.clone()),
            status,
            publisher,
            extraction,
            classification,
            notification,
        }
    }

    pub fn intake(&self) -> &IntakeStage {
        &self.intake
    }

    pub fn status(&self) -> &DocStatusService {
        &self.status
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Subscribes every stage to its input and runs them until `cancel`
    /// fires. Subscriptions are taken before this returns, so nothing
    /// produced afterwards is missed.
    pub fn spawn(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let extraction: Arc<dyn BatchHandler<ChangeEvent>> = self.extraction.clone();
        let classification: Arc<dyn BatchHandler<Envelope>> = self.classification.clone();
        let notification: Arc<dyn BatchHandler<Envelope>> = self.notification.clone();

        vec![
            spawn_stage(extraction, self.store.change_feed(), cancel.clone()),
            spawn_stage(
                classification,
                self.bus.subscribe(&self.topics.internal),
                cancel.clone(),
            ),
            spawn_stage(
                notification,
                self.bus.subscribe(&self.topics.user_notification),
                cancel,
            ),
        ]
    }

    /// Runs extraction for records still at `RECEIVED`, e.g. ones whose
    /// insertion event was emitted before the previous process stopped.
    pub async fn resume_received(&self) -> anyhow::Result<BatchReport> {
        let pending = self.store.list_by_status(DocStatus::Received).await?;
        if pending.is_empty() {
            info!("no received documents to resume");
            return Ok(BatchReport::new(ExtractionStage::NAME));
        }

        info!(count = pending.len(), "resuming received documents");
        let events = pending.iter().map(ChangeEvent::insert).collect();
        Ok(self.extraction.handle_batch(events).await)
    }

    /// Re-announces the extracted text of a `TEXT_EXTRACTED` record so the
    /// classification stage picks it up again. Returns the bus message id.
    pub async fn reprocess(&self, document_id: &str) -> Result<String, ReprocessError> {
        let record = self.status.read(document_id).await.map_err(|err| {
            if matches!(err.downcast_ref::<StoreError>(), Some(StoreError::NotFound(_))) {
                ReprocessError::NotFound(document_id.to_string())
            } else {
                ReprocessError::Other(err)
            }
        })?;

        if record.status != DocStatus::TextExtracted {
            return Err(ReprocessError::NotReprocessable {
                document_id: record.document_id,
                status: record.status,
            });
        }
        let Some(text_location) = record.extracted_text_location else {
            return Err(ReprocessError::Other(anyhow::anyhow!(
                "document {document_id} has no extracted text location"
            )));
        };

        let message_id = self
            .publisher
            .publish(PipelineEvent::TextReady(TextReadyEvent {
                document_id: record.document_id,
                extracted_text_location: text_location,
                original_name: record.original_name,
            }))
            .await?;

        info!(doc_id = %document_id, message_id = %message_id, "document queued for reclassification");
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{
        classifier::KeywordClassifier,
        notifier::LogNotifier,
        testing::{FnExtractor, Harness, PROCESSED_BUCKET, fast_retry, topics},
    };
    use crate::storage::StorageLocation;
    use anyhow::Result;

    fn pipeline(harness: &Harness) -> Pipeline {
        Pipeline::new(
            Collaborators {
                store: harness.store.clone(),
                objects: harness.objects.clone(),
                bus: harness.bus.clone(),
                extractor: Arc::new(FnExtractor::new(|_: &StorageLocation| {
                    Ok(vec!["Purchase agreement".to_string()])
                })),
                classifier: Arc::new(KeywordClassifier::default()),
                notifier: Arc::new(LogNotifier),
            },
            PipelineConfig {
                processed_bucket: PROCESSED_BUCKET.into(),
                topics: topics(),
                retry: fast_retry(),
                batch: BatchSettings::default(),
                supported: SupportedTypes::default(),
            },
        )
    }

    #[tokio::test]
    async fn resume_picks_up_received_documents() -> Result<()> {
        let harness = Harness::new().await?;
        let pipeline = pipeline(&harness);
        let record = harness.seed("deed.pdf", b"%PDF").await?;

        let report = pipeline.resume_received().await?;
        assert_eq!(report.processed(), 1);
        assert_eq!(
            harness.store.read(&record.document_id).await?.status,
            DocStatus::TextExtracted
        );

        let again = pipeline.resume_received().await?;
        assert!(again.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn reprocess_republishes_text_ready() -> Result<()> {
        let harness = Harness::new().await?;
        let pipeline = pipeline(&harness);
        let record = harness.seed("deed.pdf", b"%PDF").await?;
        pipeline.resume_received().await?;
        // drop the event produced by extraction
        harness.published(&topics().internal).await;

        pipeline.reprocess(&record.document_id).await?;

        let published = harness.published(&topics().internal).await;
        assert_eq!(published.len(), 1);
        let event = TextReadyEvent::from_envelope(&published[0])?;
        assert_eq!(event.document_id, record.document_id);
        assert_eq!(
            event.extracted_text_location,
            format!("{}.txt", record.document_id)
        );
        Ok(())
    }

    #[tokio::test]
    async fn reprocess_refuses_other_statuses() -> Result<()> {
        let harness = Harness::new().await?;
        let pipeline = pipeline(&harness);
        let received = harness.seed("a.pdf", b"%PDF").await?;

        assert!(matches!(
            pipeline.reprocess(&received.document_id).await,
            Err(ReprocessError::NotReprocessable { status: DocStatus::Received, .. })
        ));
        assert!(matches!(
            pipeline.reprocess("missing").await,
            Err(ReprocessError::NotFound(id)) if id == "missing"
        ));

        harness
            .status
            .mark_failed(&received.document_id, "bad scan")
            .await?;
        assert!(matches!(
            pipeline.reprocess(&received.document_id).await,
            Err(ReprocessError::NotReprocessable { status: DocStatus::Failed, .. })
        ));
        assert!(harness.published(&topics().internal).await.is_empty());
        Ok(())
    }
}
