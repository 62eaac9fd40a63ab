use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, PoisonError},
};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::{BatchConfig, Envelope, EnvelopeBatches, EventBus, Message, batched};

#[derive(Default)]
struct Topic {
    subscribers: Vec<mpsc::UnboundedSender<Envelope>>,
    /// Messages published while nobody was subscribed.
    backlog: VecDeque<Envelope>,
}

/// In-process fan-out bus.
///
/// Every live subscriber of a topic receives every message. Messages that
/// arrive before the first subscriber are held and handed to whoever
/// subscribes first.
pub struct InMemoryEventBus {
    topics: Mutex<HashMap<String, Topic>>,
    batch_config: BatchConfig,
}

impl InMemoryEventBus {
    pub fn new(batch_config: BatchConfig) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            batch_config,
        }
    }

    pub fn backlog_len(&self, topic: &str) -> usize {
        let topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        topics.get(topic).map(|t| t.backlog.len()).unwrap_or(0)
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(BatchConfig::default())
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, topic: &str, message: Message) -> Result<String> {
        if topic.trim().is_empty() {
            return Err(anyhow!("topic cannot be empty"));
        }

        let envelope = Envelope {
            message_id: Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            subject: message.subject,
            body: message.body,
        };
        let message_id = envelope.message_id.clone();

        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = topics.entry(topic.to_string()).or_default();
        entry
            .subscribers
            .retain(|tx| tx.send(envelope.clone()).is_ok());
        if entry.subscribers.is_empty() {
            entry.backlog.push_back(envelope);
        }

        debug!(topic, message_id = %message_id, "message accepted");
        Ok(message_id)
    }

    fn subscribe(&self, topic: &str) -> EnvelopeBatches {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = topics.entry(topic.to_string()).or_default();
        for envelope in entry.backlog.drain(..) {
            // rx is alive in this scope
            let _ = tx.send(envelope);
        }
        entry.subscribers.push(tx);

        batched(rx, self.batch_config)
    }
}
