use std::time::Duration;

/// Bounded retry with exponential backoff and optional jitter.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            jitter: true,
        }
    }
}

/// Why [`RetryPolicy::retry_async`] gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The operation failed with an error the predicate refused to retry.
    Aborted { attempts: u32, error: E },
    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Aborted { attempts, .. } | RetryError::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Aborted { error, .. } | RetryError::Exhausted { error, .. } => error,
        }
    }
}

impl RetryPolicy {
    /// Policy without waits, for tests and dry runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Delay to wait after the `failed_attempt`-th failure (1-based):
    /// `base * 2^(n-1)`, plus up to half of `base` of jitter.
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        let exp = failed_attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        let half_base = (self.base_delay.as_millis() / 2) as u64;
        if self.jitter && half_base > 0 {
            delay + Duration::from_millis(rand::random_range(0..half_base))
        } else {
            delay
        }
    }

    /// Run `op` until it succeeds, `should_retry` rejects its error, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number.
    pub async fn retry_async<F, Fut, T, E, P>(
        &self,
        mut op: F,
        mut should_retry: P,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        P: FnMut(&E) -> bool,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(v) => return Ok(v),
                Err(error) => {
                    if !should_retry(&error) {
                        return Err(RetryError::Aborted {
                            attempts: attempt,
                            error,
                        });
                    }
                    if attempt >= max_attempts {
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            error,
                        });
                    }
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "transient failure, retrying"
                    );
                    metrics::counter!("garmin_client_retries_total").increment(1);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
