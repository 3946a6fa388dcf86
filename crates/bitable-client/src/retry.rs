//! Bounded retry with a fixed pause between attempts

use crate::{config::RetryConfig, ClientError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Decides whether an error is worth another attempt
pub type RetryPredicate = fn(&ClientError) -> bool;

/// Runs an operation up to `max_retries` times
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
    retry_if: RetryPredicate,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Retry transport-class failures
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            delay,
            retry_if: ClientError::is_transient,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, config.retry_delay)
    }

    /// Replace the set of errors that trigger another attempt
    pub fn retry_if(mut self, predicate: RetryPredicate) -> Self {
        self.retry_if = predicate;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `op`, returning the first success or the last error
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries && (self.retry_if)(&e) => {
                    warn!(
                        operation,
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
