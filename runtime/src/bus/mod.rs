//! Topic-based event bus used for stage-to-stage handoff.

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

pub mod batching;
pub mod memory;

pub use batching::{BatchConfig, batched};
pub use memory::InMemoryEventBus;

/// A message as handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub subject: Option<String>,
    pub body: String,
}

/// One delivered unit of work inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: String,
    pub topic: String,
    pub subject: Option<String>,
    pub body: String,
}

pub type EnvelopeBatches = BoxStream<'static, Vec<Envelope>>;

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Returns the transport-assigned message id once the message is accepted.
    /// Acceptance does not imply delivery.
    async fn publish(&self, topic: &str, message: Message) -> Result<String>;

    /// Lazy sequence of batches for `topic`. Each envelope is acknowledged by
    /// the consumer simply by finishing with it.
    fn subscribe(&self, topic: &str) -> EnvelopeBatches;
}
