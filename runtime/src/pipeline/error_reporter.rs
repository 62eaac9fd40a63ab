use std::fmt::Display;

use tracing::{error, warn};

/// Logs per-item failures with the raw payload so a dropped item can be
/// replayed offline.
#[derive(Debug, Clone, Copy)]
pub struct ErrorReporter {
    stage: &'static str,
}

impl ErrorReporter {
    pub fn new(stage: &'static str) -> Self {
        Self { stage }
    }

    pub fn failed(&self, item: &str, raw_payload: &str, err: &anyhow::Error) {
        error!(
            stage = self.stage,
            item = %item,
            error = %err,
            payload = %raw_payload,
            "item failed"
        );

        for (depth, cause) in err.chain().skip(1).enumerate() {
            error!(
                stage = self.stage,
                item = %item,
                cause_depth = depth + 1,
                cause = %cause,
                "caused by"
            );
        }
    }

    pub fn skipped(&self, item: &str, raw_payload: &str, reason: &dyn Display) {
        warn!(
            stage = self.stage,
            item = %item,
            reason = %reason,
            payload = %raw_payload,
            "discarding malformed item"
        );
    }

    pub fn panicked(&self, item: &str, raw_payload: &str, message: &str) {
        error!(
            stage = self.stage,
            item = %item,
            panic = %message,
            payload = %raw_payload,
            "item handler panicked"
        );
    }
}
