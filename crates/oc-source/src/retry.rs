//! Bounded exponential backoff around source API calls.

use std::future::Future;
use std::time::Duration;

use oc_config::RetryConfig;
use tracing::warn;

use crate::{Result, SourceError};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: 2.0,
        }
    }

    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay before the retry that follows `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = self.initial_backoff.mul_f64(factor);
        delay.min(self.max_backoff)
    }

    /// Run `call` until it succeeds, fails permanently, or the attempts run out.
    ///
    /// Only [`SourceError::is_retryable`] failures are retried; the last error is returned.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff_for(attempt);
                    warn!(
                        operation = %operation,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient source error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(annotate_exhausted(e, attempt)),
            }
        }
    }
}

fn annotate_exhausted(error: SourceError, attempts: u32) -> SourceError {
    match error {
        SourceError::SourceApi {
            operation,
            message,
            transient: true,
        } if attempts > 1 => SourceError::SourceApi {
            operation,
            message: format!("{} (gave up after {} attempts)", message, attempts),
            transient: true,
        },
        other => other,
    }
}
