use std::{future::Future, time::Duration};

use rand::Rng;
use tokio::time::sleep;

/// Jittered exponential backoff applied around remote calls. A policy with a
/// single attempt never sleeps and never retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_pct: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, jitter_pct: f64) -> Self {
        let base_delay = base_delay.max(Duration::from_millis(1));
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter_pct: jitter_pct.clamp(0.0, 1.0),
        }
    }

    pub fn single_attempt() -> Self {
        Self::new(1, Duration::from_millis(1), Duration::from_millis(1), 0.0)
    }

    /// Backoff used for gateway and health calls when more than one attempt
    /// is configured.
    pub fn network(max_attempts: u32) -> Self {
        Self::new(
            max_attempts,
            Duration::from_millis(250),
            Duration::from_secs(5),
            0.2,
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        let exp = 2_u32.saturating_pow(attempt);
        let delay = self.base_delay.saturating_mul(exp).min(self.max_delay);
        if self.jitter_pct == 0.0 {
            return delay;
        }
        let spread = delay.as_millis() as f64 * self.jitter_pct;
        let delta = rand::thread_rng().gen_range(-spread..=spread);
        let millis = (delay.as_millis() as f64 + delta).max(0.0);
        Duration::from_millis(millis as u64)
    }

    /// Runs `op` until it succeeds, returns an error `should_retry` rejects,
    /// or the attempt budget is spent. `op` receives the zero-based attempt
    /// index.
    pub async fn retry_if<F, Fut, T, E, P>(&self, mut op: F, should_retry: P) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts || !should_retry(&err) {
                        return Err(err);
                    }
                    sleep(self.next_delay(attempt - 1)).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::single_attempt()
    }
}
