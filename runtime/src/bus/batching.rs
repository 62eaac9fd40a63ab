use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::{sync::mpsc::UnboundedReceiver, time::Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    pub max_batch_size: usize,
    /// How long to keep collecting after the first item of a batch arrives.
    pub max_linger: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 10,
            max_linger: Duration::from_millis(50),
        }
    }
}

/// Turns a channel of single items into a lazy stream of batches.
///
/// A batch is emitted when it reaches `max_batch_size` or when `max_linger`
/// has elapsed since its first item. The stream ends once every sender is
/// dropped and the buffered items have been drained.
pub fn batched<T>(rx: UnboundedReceiver<T>, config: BatchConfig) -> BoxStream<'static, Vec<T>>
where
    T: Send + 'static,
{
    let max = config.max_batch_size.max(1);

    stream::unfold(rx, move |mut rx| async move {
        let first = rx.recv().await?;
        let mut batch = Vec::with_capacity(max);
        batch.push(first);

        let deadline = Instant::now() + config.max_linger;
        while batch.len() < max {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(item)) => batch.push(item),
                Ok(None) | Err(_) => break,
            }
        }

        Some((batch, rx))
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn splits_at_max_batch_size() {
        let (tx, rx) = mpsc::unbounded_channel();
        for i in 0..5 {
            tx.send(i).unwrap();
        }
        drop(tx);

        let batches: Vec<Vec<i32>> = batched(
            rx,
            BatchConfig {
                max_batch_size: 2,
                max_linger: Duration::from_millis(10),
            },
        )
        .collect()
        .await;

        assert_eq!(batches, vec![vec![0, 1], vec![2, 3], vec![4]]);
    }

    #[tokio::test]
    async fn emits_partial_batch_after_linger() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = batched(
            rx,
            BatchConfig {
                max_batch_size: 100,
                max_linger: Duration::from_millis(20),
            },
        );

        tx.send("a").unwrap();
        let batch = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("batch before timeout")
            .expect("stream open");
        assert_eq!(batch, vec!["a"]);
        drop(tx);
        assert!(stream.next().await.is_none());
    }
}
