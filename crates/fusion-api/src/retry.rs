use std::future::Future;
use std::time::Duration;

use fusion_core::FusionConfig;

/// Attempt policy shared by the upstream clients.
///
/// Transport connect/timeout faults and 5xx responses are retried with a linear
/// backoff of `base_delay * attempt`. Any other response, including 4xx, is
/// handed back immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::single_attempt()
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn single_attempt() -> Self {
        Self { max_retries: 0, base_delay: Duration::ZERO }
    }

    #[must_use]
    pub fn from_config(config: &FusionConfig) -> Self {
        Self { max_retries: config.max_retries, base_delay: config.retry_delay }
    }

    /// Run `request_fn` until it yields a non-retryable outcome or attempts run out.
    ///
    /// # Errors
    /// Returns the last transport error when every attempt failed at the transport level.
    pub async fn send<F, Fut>(&self, request_fn: F) -> Result<reqwest::Response, reqwest::Error>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
    {
        let mut attempt = 0;
        loop {
            let can_retry = attempt < self.max_retries;
            match request_fn().await {
                Ok(response) if can_retry && response.status().is_server_error() => {
                    tracing::debug!(
                        status = %response.status(),
                        attempt = attempt + 1,
                        "upstream server error, retrying"
                    );
                }
                Ok(response) => return Ok(response),
                Err(err) if can_retry && (err.is_timeout() || err.is_connect()) => {
                    tracing::debug!(
                        error = %err,
                        attempt = attempt + 1,
                        "upstream transport fault, retrying"
                    );
                }
                Err(err) => return Err(err),
            }
            attempt += 1;
            tokio::time::sleep(self.base_delay * attempt).await;
        }
    }
}
