//! Named rate-limit buckets shared by every upstream caller
//!
//! One `RateLimiterSet` exists per process. All requests against the same
//! upstream service go through the same bucket, so limits hold in aggregate
//! rather than per caller.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;

use crate::config::{BucketSettings, default_buckets};
use crate::error::ApiError;

/// Bucket used for any name that is not configured
pub const DEFAULT_BUCKET: &str = "default";

/// Requests counted against the current window
#[derive(Debug)]
struct Window {
    started: Instant,
    used: u32,
}

/// A named `{capacity, window}` limit over fixed windows.
///
/// At most `capacity` permits are granted per window; the count resets when
/// the next window begins. Callers only see allow/deny: `acquire` either
/// grants a permit (possibly after queueing up to `max_wait`) or fails with
/// `RateLimited`.
#[derive(Debug)]
pub struct RateLimitBucket {
    name: String,
    capacity: u32,
    window: Duration,
    max_wait: Duration,
    state: Mutex<Window>,
}

impl RateLimitBucket {
    /// Create a bucket allowing `capacity` requests per `window`.
    pub fn new(name: &str, settings: &BucketSettings) -> Self {
        Self {
            name: name.to_string(),
            capacity: settings.capacity.max(1),
            window: settings.window().max(Duration::from_millis(1)),
            max_wait: settings.max_wait(),
            state: Mutex::new(Window {
                started: Instant::now(),
                used: 0,
            }),
        }
    }

    /// Take a permit, or report how long until the next window opens.
    fn take(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let elapsed = now.duration_since(state.started);
        if elapsed >= self.window {
            // Stay aligned to window boundaries
            let into_window = elapsed.as_nanos() % self.window.as_nanos();
            state.started = now - Duration::from_nanos(into_window as u64);
            state.used = 0;
        }

        if state.used < self.capacity {
            state.used += 1;
            Ok(())
        } else {
            Err(self.window.saturating_sub(now.duration_since(state.started)))
        }
    }

    /// Take a permit, queueing for at most `max_wait`.
    pub async fn acquire(&self) -> Result<(), ApiError> {
        let deadline = Instant::now() + self.max_wait;
        loop {
            let wait = match self.take() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };

            if Instant::now() + wait > deadline {
                debug!("Bucket {} exhausted, rejecting", self.name);
                return Err(ApiError::RateLimited(None));
            }

            debug!("Bucket {} exhausted, waiting {:?} for the next window", self.name, wait);
            tokio::time::sleep(wait).await;
        }
    }
}

/// Collection of buckets keyed by name.
pub struct RateLimiterSet {
    buckets: HashMap<String, RateLimitBucket>,
}

impl Default for RateLimiterSet {
    fn default() -> Self {
        Self::new(&default_buckets())
    }
}

impl RateLimiterSet {
    /// Build one bucket per configured name. A `default` bucket always exists.
    pub fn new(settings: &BTreeMap<String, BucketSettings>) -> Self {
        let mut buckets: HashMap<String, RateLimitBucket> = settings
            .iter()
            .map(|(name, s)| (name.clone(), RateLimitBucket::new(name, s)))
            .collect();

        if !buckets.contains_key(DEFAULT_BUCKET) {
            let fallback = default_buckets()
                .remove(DEFAULT_BUCKET)
                .unwrap_or(BucketSettings {
                    capacity: 10,
                    window_ms: 1_000,
                    max_wait_ms: 0,
                });
            buckets.insert(
                DEFAULT_BUCKET.to_string(),
                RateLimitBucket::new(DEFAULT_BUCKET, &fallback),
            );
        }

        Self { buckets }
    }

    /// Look up a bucket, falling back to `default` for unknown names.
    pub fn bucket(&self, name: &str) -> &RateLimitBucket {
        match self.buckets.get(name) {
            Some(bucket) => bucket,
            None => {
                warn!("Unknown rate limit bucket '{}', using default", name);
                &self.buckets[DEFAULT_BUCKET]
            }
        }
    }

    /// Wait for permission on a bucket.
    pub async fn acquire(&self, name: &str) -> Result<(), ApiError> {
        self.bucket(name).acquire().await
    }
}
