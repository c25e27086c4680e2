//! Bounded retry with linear backoff, driven by the [`CallError`] tag.

use super::backend::CallError;
use crate::types::ProviderConfig;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Backoff unit; retry `n` sleeps `unit * (n + 1)`.
    pub unit: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            max_retries: config.call_retries,
            unit: config.retry_sleep(),
        }
    }

    pub fn none() -> Self {
        Self {
            max_retries: 0,
            unit: Duration::ZERO,
        }
    }

    pub fn backoff(&self, retry: u32) -> Duration {
        self.unit * (retry + 1)
    }

    /// Run `op` until it succeeds, fails fatally, or retries run out.
    pub async fn run<T, F, Fut>(&self, tool: &str, mut op: F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let mut retry = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(CallError::Retryable(message)) if retry < self.max_retries => {
                    retry += 1;
                    tracing::warn!(tool, attempt = retry, error = %message, "tool_call_retry");
                    tokio::time::sleep(self.backoff(retry)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            unit: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retryable_then_success() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let out = policy(2)
            .run("t", move || async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(CallError::Retryable("Read timed out".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(out, Ok(7));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fatal_not_retried() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let out: Result<(), _> = policy(3)
            .run("t", move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(CallError::Fatal("bad".into()))
            })
            .await;
        assert_eq!(out, Err(CallError::Fatal("bad".into())));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let out: Result<(), _> = policy(1)
            .run("t", move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(CallError::Retryable("Connection aborted".into()))
            })
            .await;
        assert!(out.unwrap_err().is_retryable());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_linear_backoff() {
        let p = RetryPolicy {
            max_retries: 3,
            unit: Duration::from_millis(300),
        };
        assert_eq!(p.backoff(1), Duration::from_millis(600));
        assert_eq!(p.backoff(2), Duration::from_millis(900));
    }
}
