use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    Processed,
    Skipped { reason: String },
    Failed { reason: String },
}

impl ItemOutcome {
    pub fn skipped(reason: impl fmt::Display) -> Self {
        ItemOutcome::Skipped {
            reason: reason.to_string(),
        }
    }

    pub fn failed(reason: impl fmt::Display) -> Self {
        ItemOutcome::Failed {
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    /// Document id when known, otherwise the transport's message id.
    pub item: String,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

/// Aggregated result of one batch invocation. A batch always completes; the
/// per-item outcomes say what happened to each envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub stage: String,
    pub items: Vec<ItemReport>,
}

impl BatchReport {
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            items: Vec::new(),
        }
    }

    pub fn push(&mut self, item: impl Into<String>, outcome: ItemOutcome) {
        self.items.push(ItemReport {
            item: item.into(),
            outcome,
        });
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn processed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Processed))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Failed { .. }))
    }

    pub fn outcome_for(&self, item: &str) -> Option<&ItemOutcome> {
        self.items
            .iter()
            .find(|report| report.item == item)
            .map(|report| &report.outcome)
    }

    fn count(&self, pred: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.items.iter().filter(|r| pred(&r.outcome)).count()
    }
}
