pub mod classification;
pub mod classifier;
pub mod error_reporter;
pub mod events;
pub mod extraction;
pub mod extractor;
pub mod file_types;
pub mod intake;
pub mod notifier;
pub mod outcome;
pub mod pipeline;
pub mod publisher;
pub mod retry;
pub mod runner;
pub mod status_service;

#[cfg(test)]
pub(crate) mod testing;

pub use classification::ClassificationStage;
pub use classifier::{Classifier, KeywordClassifier, KeywordRule};
pub use error_reporter::ErrorReporter;
pub use events::{
    InsertedDocument, PayloadError, PipelineEvent, TextReadyEvent, UploadNotification,
    UploadedObject, UserNotification,
};
pub use extraction::ExtractionStage;
pub use extractor::{PlainTextExtractor, TextExtractor, join_lines};
pub use file_types::SupportedTypes;
pub use intake::{IntakeStage, new_document_id};
pub use notifier::{LogNotifier, NotificationStage, Notifier};
pub use outcome::{BatchReport, ItemOutcome, ItemReport};
pub use pipeline::{Collaborators, Pipeline, PipelineConfig, ReprocessError};
pub use publisher::{EventPublisher, Topics};
pub use retry::RetryPolicy;
pub use runner::{BatchHandler, BatchSettings, process_batch, run_stage, spawn_stage};
pub use status_service::DocStatusService;
