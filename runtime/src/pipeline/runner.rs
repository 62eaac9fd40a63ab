use std::{any::Any, future::Future, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{
    FutureExt,
    stream::{self, BoxStream, StreamExt},
};
use serde::Deserialize;
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{
    error_reporter::ErrorReporter,
    outcome::{BatchReport, ItemOutcome},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Envelopes of one batch processed at the same time.
    pub concurrency: usize,
    /// Overall budget of one batch invocation, in milliseconds.
    pub deadline_ms: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            concurrency: 8,
            deadline_ms: 60_000,
        }
    }
}

impl BatchSettings {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// One envelope prepared for processing.
pub struct WorkItem<T> {
    pub id: String,
    pub raw: String,
    pub payload: T,
}

/// Runs `handle` for every item, isolated from its siblings.
///
/// A panicking handler or one that misses the batch deadline yields a
/// `Failed` outcome for that item only. Items cut off by the deadline keep
/// whatever status they last committed and are picked up again on
/// redelivery.
pub async fn process_batch<T, F, Fut>(
    stage: &'static str,
    items: Vec<WorkItem<T>>,
    settings: &BatchSettings,
    handle: F,
) -> BatchReport
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = ItemOutcome>,
{
    let reporter = ErrorReporter::new(stage);
    let deadline = Instant::now() + settings.deadline();

    let outcomes: Vec<(String, ItemOutcome)> = stream::iter(items)
        .map(|item| {
            let WorkItem { id, raw, payload } = item;
            let guarded = AssertUnwindSafe(handle(payload)).catch_unwind();
            async move {
                let outcome = match tokio::time::timeout_at(deadline, guarded).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(panic)) => {
                        let message = panic_message(panic.as_ref());
                        reporter.panicked(&id, &raw, &message);
                        ItemOutcome::failed(format!("handler panicked: {message}"))
                    }
                    Err(_) => {
                        warn!(stage, item = %id, "batch deadline exceeded before item finished");
                        ItemOutcome::failed("batch deadline exceeded")
                    }
                };
                (id, outcome)
            }
        })
        .buffered(settings.concurrency.max(1))
        .collect()
        .await;

    let mut report = BatchReport::new(stage);
    for (id, outcome) in outcomes {
        report.push(id, outcome);
    }
    report
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[async_trait]
pub trait BatchHandler<T>: Send + Sync
where
    T: Send + 'static,
{
    fn name(&self) -> &'static str;

    async fn handle_batch(&self, batch: Vec<T>) -> BatchReport;
}

/// Feeds batches from `batches` into `handler` until the stream ends or the
/// token is cancelled. A batch in flight is always finished first.
pub async fn run_stage<T>(
    handler: Arc<dyn BatchHandler<T>>,
    mut batches: BoxStream<'static, Vec<T>>,
    cancel: CancellationToken,
) where
    T: Send + 'static,
{
    let stage = handler.name();
    info!(stage, "stage started");

    loop {
        let batch = tokio::select! {
            _ = cancel.cancelled() => break,
            next = batches.next() => match next {
                Some(batch) => batch,
                None => break,
            },
        };

        let report = handler.handle_batch(batch).await;
        info!(
            stage,
            items = report.len(),
            processed = report.processed(),
            skipped = report.skipped(),
            failed = report.failed(),
            "batch complete"
        );
    }

    info!(stage, "stage stopped");
}

pub fn spawn_stage<T>(
    handler: Arc<dyn BatchHandler<T>>,
    batches: BoxStream<'static, Vec<T>>,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    T: Send + 'static,
{
    tokio::spawn(run_stage(handler, batches, cancel))
}
