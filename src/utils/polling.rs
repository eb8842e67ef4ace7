/// Polling utilities for waiting on conditions with timeout and cancellation
use anyhow::Result;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::PollSettings;

/// Reasons a poll loop stops without the condition being met
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("Timeout after {secs} seconds: {description}")]
    Timeout { secs: u64, description: String },

    #[error("Cancelled: {description}")]
    Cancelled { description: String },
}

/// Configuration for polling operations
pub struct PollingConfig {
    pub timeout: Duration,
    pub interval: Duration,
    pub description: String,
    cancel: CancellationToken,
}

impl PollingConfig {
    /// Create a new polling configuration
    pub fn new(timeout_secs: u64, interval_secs: u64, description: impl Into<String>) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
            interval: Duration::from_secs(interval_secs),
            description: description.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Create from a configured timeout/interval pair
    pub fn from_settings(settings: &PollSettings, description: impl Into<String>) -> Self {
        Self::new(settings.timeout_secs, settings.interval_secs, description)
    }

    /// Stop waiting as soon as `token` is cancelled
    pub fn cancel_on(mut self, token: &CancellationToken) -> Self {
        self.cancel = token.clone();
        self
    }

    fn cancelled(&self) -> anyhow::Error {
        PollError::Cancelled {
            description: self.description.clone(),
        }
        .into()
    }

    /// Poll until condition is met or timeout
    ///
    /// The condition function should return:
    /// - Ok(Some(T)) when condition is met (returns T)
    /// - Ok(None) when condition is not yet met (continues polling)
    /// - Err(e) when an error occurs (stops polling and returns error)
    pub async fn poll<F, Fut, T>(&self, condition: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        info!("{}...", self.description);

        let start = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(self.cancelled());
            }

            attempt += 1;
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return Err(self.cancelled()),
                outcome = condition() => outcome,
            };

            if let Some(value) = outcome? {
                info!("✓ {}", self.description);
                return Ok(value);
            }

            if start.elapsed() > self.timeout {
                return Err(PollError::Timeout {
                    secs: self.timeout.as_secs(),
                    description: self.description.clone(),
                }
                .into());
            }

            debug!(
                "{}: attempt {} not ready, retrying in {}s",
                self.description,
                attempt,
                self.interval.as_secs()
            );

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(self.cancelled()),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// Poll until condition returns Ok(true) or timeout
    ///
    /// Simplified version for boolean conditions
    pub async fn poll_until<F, Fut>(&self, condition: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        self.poll(|| async {
            match condition().await {
                Ok(true) => Ok(Some(())),
                Ok(false) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_polling_success() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let config = PollingConfig::new(10, 1, "test polling");

        let result = config
            .poll(|| {
                let c = counter_clone.clone();
                async move {
                    let val = c.fetch_add(1, Ordering::SeqCst);
                    if val >= 2 {
                        Ok(Some(val))
                    } else {
                        Ok(None)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_polling_timeout() {
        let config = PollingConfig::new(2, 1, "test timeout");

        let result = config
            .poll(|| async { Ok::<Option<()>, anyhow::Error>(None) })
            .await;

        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PollError>(),
            Some(PollError::Timeout { secs: 2, .. })
        ));
        assert!(err.to_string().contains("Timeout"));
    }

    #[tokio::test]
    async fn test_polling_propagates_condition_error() {
        let config = PollingConfig::new(10, 1, "test error");

        let result = config
            .poll(|| async { Err::<Option<()>, _>(anyhow::anyhow!("kubectl exploded")) })
            .await;

        assert_eq!(result.unwrap_err().to_string(), "kubectl exploded");
    }

    #[tokio::test]
    async fn test_poll_until_success() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let config = PollingConfig::new(10, 1, "test poll_until");

        let result = config
            .poll_until(|| {
                let c = counter_clone.clone();
                async move {
                    let val = c.fetch_add(1, Ordering::SeqCst);
                    Ok(val >= 2)
                }
            })
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_sleep() {
        let token = CancellationToken::new();
        let config = PollingConfig::new(600, 300, "test cancel").cancel_on(&token);

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let result = config
            .poll(|| async { Ok::<Option<()>, anyhow::Error>(None) })
            .await;

        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(matches!(
            result.unwrap_err().downcast_ref::<PollError>(),
            Some(PollError::Cancelled { .. })
        ));
    }

    #[tokio::test]
    async fn test_already_cancelled_skips_condition() {
        let token = CancellationToken::new();
        token.cancel();
        let config = PollingConfig::new(10, 1, "test pre-cancelled").cancel_on(&token);

        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let result = config
            .poll(|| {
                let c = calls_clone.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<Option<()>, anyhow::Error>(Some(()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
