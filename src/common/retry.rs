//! Bounded retry for Azure calls.
//!
//! One policy is built from configuration and injected into the transport,
//! so every call site retries the same way. Only transient failures are
//! retried; authorization and not-found errors surface immediately.

use crate::config::{BackoffKind, RetryConfig};
use crate::error::TransportError;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: BackoffKind,
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
            delay: Duration::from_millis(config.delay_ms),
            backoff: config.backoff,
        }
    }

    /// A policy that tries once and never sleeps.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
            backoff: BackoffKind::Fixed,
        }
    }

    /// Delay before the given retry (1-based: the wait after attempt `n` fails).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            BackoffKind::Fixed => self.delay,
            BackoffKind::Incremental => self.delay.saturating_mul(attempt),
            BackoffKind::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.delay.saturating_mul(factor)
            }
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let wait = self.delay_for(attempt);
                    log::debug!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        label,
                        attempt,
                        self.max_attempts,
                        err,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_retryable() {
                        log::warn!("{} failed after {} attempts: {}", label, attempt, err);
                    }
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32, backoff: BackoffKind) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(10),
            backoff,
        }
    }

    #[test]
    fn test_delay_progression() {
        let fixed = policy(3, BackoffKind::Fixed);
        assert_eq!(fixed.delay_for(1), Duration::from_millis(10));
        assert_eq!(fixed.delay_for(3), Duration::from_millis(10));

        let incremental = policy(3, BackoffKind::Incremental);
        assert_eq!(incremental.delay_for(2), Duration::from_millis(20));
        assert_eq!(incremental.delay_for(3), Duration::from_millis(30));

        let exponential = policy(4, BackoffKind::Exponential);
        assert_eq!(exponential.delay_for(1), Duration::from_millis(10));
        assert_eq!(exponential.delay_for(2), Duration::from_millis(20));
        assert_eq!(exponential.delay_for(3), Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = policy(3, BackoffKind::Fixed)
            .run("query", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(TransportError::Transient("503".into()))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result, Ok(3));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = policy(2, BackoffKind::Fixed)
            .run("query", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TransportError::Transient("timeout".into()))
            })
            .await;
        assert!(matches!(result, Err(TransportError::Transient(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_auth_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = policy(5, BackoffKind::Fixed)
            .run("query", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TransportError::Auth("AuthorizationFailed".into()))
            })
            .await;
        assert!(matches!(result, Err(TransportError::Auth(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
