use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{error, info};

use crate::error::{Result, VaultClientError};

/// Retries cold-store calls on transient errors with exponential backoff and
/// jitter. Fatal errors (missing archives, stale job ids) pass through
/// untouched so the caller can apply its own policy.
pub struct RetryWrapper {
    max_attempts: usize,
    base_delay: Duration,
    api_tag: &'static str,
}

impl RetryWrapper {
    pub fn new(api_tag: &'static str) -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            api_tag,
        }
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Runs `make_request` until it succeeds, fails fatally, or the attempt
    /// budget is exhausted.
    pub async fn run<T, F, Fut>(self, mut make_request: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let strategy = ExponentialBackoff::from_millis(self.base_delay.as_millis().min(u64::MAX as u128) as u64)
            .map(jitter)
            .take(self.max_attempts);

        let api = self.api_tag;
        let max_attempts = self.max_attempts;
        let try_count = AtomicUsize::new(0);

        let result = RetryIf::spawn(
            strategy,
            || {
                let attempt = try_count.fetch_add(1, Ordering::Relaxed) + 1;
                let request = make_request();
                async move {
                    let result = request.await;
                    if let Err(e) = &result {
                        if e.is_retryable() {
                            info!(api, "Retryable error (attempt {attempt}/{max_attempts}): {e}");
                        } else {
                            error!(api, "Fatal error (attempt {attempt}): {e}");
                        }
                    }
                    result
                }
            },
            |err: &VaultClientError| err.is_retryable(),
        )
        .await;

        if let Err(e) = &result {
            if e.is_retryable() {
                error!(api, "No more retries; aborting: {e}");
            }
        }

        result
    }
}
