use log::debug;
use std::{future::Future, time::Duration};

/// Exponential backoff used for the ledger connectivity check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    multiplier: u32,
    max_delay: Duration,
}

/// Returned by [`RetryPolicy::run`] once every attempt failed.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last: E,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);
    pub const DEFAULT_MULTIPLIER: u32 = 2;
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

    /// `max_attempts` counts the first try; zero is treated as one.
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier: multiplier.max(1),
            max_delay: Self::DEFAULT_MAX_DELAY,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay slept after the failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.saturating_pow(exponent);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Runs `op` until it succeeds or the attempt budget is spent. `op`
    /// receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(last) if attempt >= self.max_attempts => {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last,
                    })
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    debug!(
                        "Attempt {} of {} failed, with error: {}. Retrying in {:?}",
                        attempt, self.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_MAX_ATTEMPTS,
            Self::DEFAULT_BASE_DELAY,
            Self::DEFAULT_MULTIPLIER,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn flaky(failures: u32) -> impl FnMut(u32) -> std::future::Ready<Result<u32, String>> {
        move |attempt| {
            std::future::ready(if attempt <= failures {
                Err(format!("failure {}", attempt))
            } else {
                Ok(attempt)
            })
        }
    }

    #[test]
    fn delays_grow_exponentially_and_are_capped() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), 2)
            .with_max_delay(Duration::from_millis(500));

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, 2).max_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn it_succeeds_within_the_budget() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100), 2);
        let started = Instant::now();

        let result = policy.run(flaky(3)).await.unwrap();

        assert_eq!(result, 4);
        // 100 + 200 + 400 ms of backoff on the paused clock
        assert_eq!(started.elapsed(), Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn it_gives_up_after_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100), 2);

        let err = policy.run(flaky(3)).await.unwrap_err();

        assert_eq!(err.attempts, 3);
        assert_eq!(err.last, "failure 3");
    }
}
