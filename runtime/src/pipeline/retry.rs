//! Bounded-time calls to external collaborators with exponential backoff.

use std::{future::Future, time::Duration};

use anyhow::{Result, anyhow};
use serde::Deserialize;
use tracing::warn;

use crate::storage::StoreError;

use super::events::PayloadError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay used as random jitter (0.0 - 1.0).
    pub jitter: f64,
    /// Upper bound for a single attempt.
    #[serde(with = "millis")]
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.3,
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Rejects settings that would make the backoff meaningless.
    pub fn validate(&self) -> Result<(), String> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!(
                "multiplier must be a finite number >= 1.0, got {}",
                self.multiplier
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(format!("jitter must be within 0.0..=1.0, got {}", self.jitter));
        }
        if self.initial_delay > self.max_delay {
            return Err("initial_delay must not exceed max_delay".to_string());
        }
        Ok(())
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        // clamp in f64 before building a Duration; large exponents overflow it
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let growth = self.multiplier.max(1.0).powi(exponent);
        let secs = self.initial_delay.as_secs_f64() * growth;
        let cap = self.max_delay.as_secs_f64();
        let base = if secs.is_finite() && secs < cap {
            Duration::from_secs_f64(secs)
        } else {
            self.max_delay
        };

        let jitter = if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if jitter == 0.0 {
            return base;
        }
        let spread = base.mul_f64(jitter * fastrand::f64());
        if fastrand::bool() {
            base.saturating_add(spread)
        } else {
            base.saturating_sub(spread)
        }
    }

    /// Runs `call` until it succeeds, fails permanently, or the attempts run
    /// out. Each attempt is cut off after `call_timeout`.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let err = match tokio::time::timeout(self.call_timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => err,
                Err(_) => anyhow!(
                    "{operation} timed out after {}ms",
                    self.call_timeout.as_millis()
                ),
            };

            if !is_retryable(&err) || attempt >= attempts {
                return Err(err.context(format!("{operation} failed after {attempt} attempt(s)")));
            }

            let delay = self.delay_for_attempt(attempt);
            warn!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Store decisions and bad payloads will not change on retry; every other
/// collaborator failure is treated as transient.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    if let Some(store_err) = err.downcast_ref::<StoreError>() {
        return store_err.is_transient();
    }
    err.downcast_ref::<PayloadError>().is_none()
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
