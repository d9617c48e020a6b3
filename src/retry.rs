//! Bounded retry of a single fallible operation.
//!
//! Resources (sockets) are created by the caller before `run` and only the operation
//! is re-invoked. With `max_retries = n` the operation runs at most `n + 1` times and
//! the last error is returned unchanged.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn, Instrument, Span};

use crate::error::{ErrorClass, WxError};

/// OS-level interruptions and accept/read timeouts.
pub const TRANSIENT: &[ErrorClass] = &[ErrorClass::Transient];

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retryable: &'static [ErrorClass],
    /// Base delay before the first retry; doubled on every following retry.
    pub backoff: Duration,
    span: Span,
}

const MAX_BACKOFF: Duration = Duration::from_secs(10);

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, retryable: &'static [ErrorClass]) -> Self {
        Self {
            max_retries,
            retryable,
            backoff: Duration::ZERO,
            span: Span::current(),
        }
    }
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
    #[must_use]
    pub const fn with_retryable(mut self, retryable: &'static [ErrorClass]) -> Self {
        self.retryable = retryable;
        self
    }
    /// Span the retry events are recorded under.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    #[must_use]
    pub fn is_retryable(&self, err: &WxError) -> bool {
        self.retryable.contains(&err.class())
    }

    fn delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        self.backoff.saturating_mul(1u32 << exp).min(MAX_BACKOFF)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the retry
    /// budget is spent. `op` receives the zero-based attempt number.
    ///
    /// # Errors
    ///
    /// The error of the last invocation, unchanged.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, WxError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, WxError>>,
    {
        let mut retries = 0u32;
        loop {
            let attempt = retries;
            match op(attempt).instrument(self.span.clone()).await {
                Ok(v) => return Ok(v),
                Err(e) if !self.is_retryable(&e) => return Err(e),
                Err(e) => {
                    if retries >= self.max_retries {
                        self.span.in_scope(|| {
                            warn!(label, retries, error = %e, "retry budget exhausted");
                        });
                        return Err(e);
                    }
                    retries += 1;
                    let delay = self.delay(retries);
                    self.span.in_scope(|| {
                        debug!(label, retry = retries, max = self.max_retries, error = %e, ?delay, "retrying");
                    });
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, TRANSIENT).with_backoff(Duration::from_millis(100))
    }
}
