//! Exponential-backoff retry around idempotent relay calls.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use relaycrypt_core::config::TransferSettings;
use relaycrypt_core::{TransferError, TransferResult};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&TransferSettings::default())
    }
}

impl RetryPolicy {
    /// `max_attempts` counts the first call; 0 is treated as 1.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: true,
        }
    }

    pub fn from_settings(settings: &TransferSettings) -> Self {
        Self::new(settings.max_attempts)
            .with_delays(settings.retry_base_delay(), settings.retry_max_delay())
            .with_jitter(settings.retry_jitter)
    }

    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max.max(base);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_max_times((self.max_attempts - 1) as usize);
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempt budget runs out.
    ///
    /// Exhaustion is reported as [`TransferError::RetriesExhausted`] tagged
    /// with `label`; non-transient errors come back untouched.
    pub async fn retry<T, F, Fut>(&self, label: &str, mut op: F) -> TransferResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = TransferResult<T>>,
    {
        let attempts = AtomicU32::new(0);
        let result = (|| {
            attempts.fetch_add(1, Ordering::Relaxed);
            op()
        })
        .retry(self.backoff())
        .sleep(tokio::time::sleep)
        .when(|e: &TransferError| e.is_retryable())
        .notify(|err: &TransferError, delay: Duration| {
            warn!(
                label,
                attempt = attempts.load(Ordering::Relaxed),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying"
            );
        })
        .await;

        result.map_err(|err| {
            if err.is_retryable() {
                TransferError::RetriesExhausted {
                    label: label.to_string(),
                    attempts: attempts.load(Ordering::Relaxed),
                    source: Box::new(err),
                }
            } else {
                err
            }
        })
    }
}
