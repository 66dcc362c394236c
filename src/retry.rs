use std::future::Future;
use std::time::Duration;

use log::{info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::settings::RetryConfig;

/// Bounded exponential backoff shared by the upload queue and the generation scheduler.
///
/// `delay_for(n) = min(base * 2^n, cap)`, so delays never decrease across attempts and never
/// exceed the cap.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub cap_delay: Duration,
    pub retryable: fn(&PipelineError) -> bool,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("cap_delay", &self.cap_delay)
            .finish()
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, cap_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            cap_delay: cap_delay.max(base_delay),
            retryable: PipelineError::is_retryable,
        }
    }

    pub fn with_retryable(mut self, predicate: fn(&PipelineError) -> bool) -> Self {
        self.retryable = predicate;
        self
    }

    /// Delay to wait after a failure when `attempt` attempts had already been made before it.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // 2^31 ms already overflows any sane cap; clamp the shift instead of the product.
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.cap_delay)
            .min(self.cap_delay)
    }

    pub fn is_exhausted(&self, attempts_made: u32) -> bool {
        attempts_made >= self.max_attempts
    }

    /// Run `op` until it succeeds, returns a non-retryable error, or the attempt budget runs out.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> PipelineResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = PipelineResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        info!("{label} recovered after {} attempts", attempt + 1);
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let made = attempt + 1;
                    if !(self.retryable)(&err) {
                        warn!("{label} failed with non-retryable error: {err}");
                        return Err(err);
                    }
                    if self.is_exhausted(made) {
                        warn!("{label} exhausted {made} attempts: {err}");
                        return Err(PipelineError::Terminal {
                            attempts: made,
                            last_error: err.to_string(),
                        });
                    }

                    let delay = self.delay_for(attempt);
                    warn!(
                        "{label} attempt {made}/{} failed, retrying in {}ms: {err}",
                        self.max_attempts,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt = made;
                }
            }
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }
}
