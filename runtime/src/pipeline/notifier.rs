use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::bus::Envelope;

use super::{
    error_reporter::ErrorReporter,
    events::UserNotification,
    outcome::{BatchReport, ItemOutcome},
    runner::{BatchHandler, BatchSettings, WorkItem, process_batch},
};

/// Final delivery of user-facing notifications (mail, chat, ...).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &UserNotification) -> Result<()>;
}

/// Writes notifications to the log. Used when no delivery channel is
/// configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &UserNotification) -> Result<()> {
        info!(
            subject = %notification.subject,
            body = %notification.body,
            "user notification"
        );
        Ok(())
    }
}

/// Subscriber of the user-notification topic that hands every message to a
/// [`Notifier`].
pub struct NotificationStage {
    notifier: Arc<dyn Notifier>,
    batch: BatchSettings,
    reporter: ErrorReporter,
}

impl NotificationStage {
    pub const NAME: &'static str = "notification";

    pub fn new(notifier: Arc<dyn Notifier>, batch: BatchSettings) -> Self {
        Self {
            notifier,
            batch,
            reporter: ErrorReporter::new(Self::NAME),
        }
    }

    async fn deliver(&self, envelope: Envelope) -> ItemOutcome {
        let notification = match UserNotification::from_envelope(&envelope) {
            Ok(notification) => notification,
            Err(err) => {
                self.reporter
                    .skipped(&envelope.message_id, &envelope.body, &err);
                return ItemOutcome::skipped(err);
            }
        };

        match self.notifier.notify(&notification).await {
            Ok(()) => ItemOutcome::Processed,
            Err(err) => {
                self.reporter
                    .failed(&envelope.message_id, &envelope.body, &err);
                ItemOutcome::failed(format!("{err:#}"))
            }
        }
    }
}

#[async_trait]
impl BatchHandler<Envelope> for NotificationStage {
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
            self.deliver(envelope)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<UserNotification>>,
    }

    #[async_trait]
    impl Notifier for Recording {
        async fn notify(&self, notification: &UserNotification) -> Result<()> {
            if notification.subject.contains("bounce") {
                anyhow::bail!("mailbox full");
            }
            self.seen.lock().await.push(notification.clone());
            Ok(())
        }
    }

    fn envelope(id: &str, subject: Option<&str>, body: &str) -> Envelope {
        Envelope {
            message_id: id.into(),
            topic: "user-notifications".into(),
            subject: subject.map(str::to_string),
            body: body.into(),
        }
    }

    #[tokio::test]
    async fn delivers_each_notification_independently() {
        let recording = Arc::new(Recording::default());
        let stage = NotificationStage::new(recording.clone(), BatchSettings::default());

        let report = stage
            .handle_batch(vec![
                envelope("m1", Some("Document Classified: a.pdf"), "Detected Type: INVOICE"),
                envelope("m2", None, "no subject"),
                envelope("m3", Some("bounce"), "body"),
                envelope("m4", Some("Document Classified: b.pdf"), "Detected Type: UNKNOWN"),
            ])
            .await;

        assert_eq!(report.processed(), 2);
        assert_eq!(report.skipped(), 1);
        assert!(matches!(
            report.outcome_for("m3"),
            Some(ItemOutcome::Failed { reason }) if reason.contains("mailbox full")
        ));

        let seen = recording.seen.lock().await;
        let subjects: Vec<_> = seen.iter().map(|n| n.subject.as_str()).collect();
        assert_eq!(
            subjects,
            vec!["Document Classified: a.pdf", "Document Classified: b.pdf"]
        );
    }

    #[tokio::test]
    async fn log_notifier_accepts_everything() -> Result<()> {
        LogNotifier
            .notify(&UserNotification::classified(
                "a.pdf",
                "id-1",
                crate::storage::DocumentType::Contract,
            ))
            .await
    }
}
