use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;
use tracing::debug;

use crate::bus::EventBus;

use super::{events::PipelineEvent, retry::RetryPolicy};

/// Topic identifiers resolved from configuration at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Topics {
    /// Extraction -> classification handoff ("text-ready").
    pub internal: String,
    /// Classification -> user notifications.
    pub user_notification: String,
}

/// Routes each [`PipelineEvent`] variant to its configured topic.
#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<dyn EventBus>,
    topics: Topics,
    retry: RetryPolicy,
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn EventBus>, topics: Topics, retry: RetryPolicy) -> Self {
        Self { bus, topics, retry }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn topic_for(&self, event: &PipelineEvent) -> &str {
        match event {
            PipelineEvent::TextReady(_) => &self.topics.internal,
            PipelineEvent::DocumentClassified(_) => &self.topics.user_notification,
        }
    }

    pub async fn publish(&self, event: PipelineEvent) -> Result<String> {
        let topic = self.topic_for(&event).to_string();
        let message = event.into_message();
        let bus = self.bus.clone();

        let message_id = self
            .retry
            .run("event publish", || {
                let bus = bus.clone();
                let message = message.clone();
                let topic = topic.clone();
                async move { bus.publish(&topic, message).await }
            })
            .await?;

        debug!(topic = %topic, message_id = %message_id, "event published");
        Ok(message_id)
    }
}
