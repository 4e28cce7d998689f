//! Exponential backoff with jitter for upstream calls
//!
//! Only failures classified as retriable (`Error::is_retriable`) are retried.
//! Rate-limited failures wait at least as long as the server asked, or the
//! configured rate-limit floor when it did not say.

use std::future::Future;
use std::time::Duration;

use log::{error, warn};
use rand::Rng;
use tokio::time::Instant;

use crate::config::RetrySettings;
use crate::error::Result;

/// Backoff parameters for one class of calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Deadline for the whole call, across attempts
    pub max_elapsed: Duration,
    pub jitter: f64,
    pub rate_limited_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(s: &RetrySettings) -> Self {
        Self {
            base_delay: Duration::from_millis(s.base_delay_ms),
            multiplier: s.multiplier.max(1.0),
            max_delay: Duration::from_millis(s.max_delay_ms),
            max_elapsed: Duration::from_millis(s.max_elapsed_ms),
            jitter: s.jitter.clamp(0.0, 1.0),
            rate_limited_delay: Duration::from_millis(s.rate_limited_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[cfg(test)]
    pub fn none() -> Self {
        Self {
            max_elapsed: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Un-jittered delay before attempt `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let millis = (self.base_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        delay.mul_f64((1.0 + spread).max(0.0))
    }

    /// Delay to sleep after a failed attempt.
    pub fn delay_for(&self, attempt: u32, err: &crate::error::Error) -> Duration {
        let delay = self.jittered(self.backoff(attempt));
        if err.is_rate_limited() {
            delay.max(err.retry_after().unwrap_or(self.rate_limited_delay))
        } else {
            delay
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or the deadline passes.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_retriable() {
            return Err(err);
        }

        let delay = policy.delay_for(attempt, &err);
        if started.elapsed() + delay > policy.max_elapsed {
            error!(
                "{} failed after {} attempt(s), giving up: {}",
                what,
                attempt + 1,
                err
            );
            return Err(err);
        }

        warn!(
            "{} failed (attempt {}): {}. Retrying in {:?}",
            what,
            attempt + 1,
            err,
            delay
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
