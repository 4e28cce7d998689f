//! In-memory killmail cache
//!
//! Killmails, per-system id indexes, per-system kill counts and fetch recency
//! markers, each in its own TTL store. Everything lives in process memory and
//! is lost on restart.

pub mod clock;
pub mod kills;
pub mod storage;

use std::time::Duration;

use crate::config::CacheSettings;

/// Lifetimes for each kind of cache entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheTtl {
    pub killmail: Duration,
    pub system_index: Duration,
    pub kill_count: Duration,
    pub recent_fetch: Duration,
    /// Fraction of `recent_fetch` randomized per marker
    pub recent_fetch_jitter: f64,
}

impl CacheTtl {
    pub const KILLMAIL: Duration = Duration::from_secs(24 * 60 * 60); // 24 hr
    pub const SYSTEM_INDEX: Duration = Duration::from_secs(24 * 60 * 60); // 24 hr
    pub const KILL_COUNT: Duration = Duration::from_secs(60 * 60); // 1 hr
    pub const RECENT_FETCH: Duration = Duration::from_secs(15 * 60); // 15 min
    pub const RECENT_FETCH_JITTER: f64 = 0.1;
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self {
            killmail: Self::KILLMAIL,
            system_index: Self::SYSTEM_INDEX,
            kill_count: Self::KILL_COUNT,
            recent_fetch: Self::RECENT_FETCH,
            recent_fetch_jitter: Self::RECENT_FETCH_JITTER,
        }
    }
}

impl From<&CacheSettings> for CacheTtl {
    fn from(settings: &CacheSettings) -> Self {
        let killmail = Duration::from_secs(settings.killmail_ttl_secs);
        Self {
            killmail,
            // Indexes live as long as the killmails they point at
            system_index: killmail,
            kill_count: Duration::from_secs(settings.kill_count_ttl_secs),
            recent_fetch: Duration::from_secs(settings.recent_fetch_ttl_secs),
            recent_fetch_jitter: settings.recent_fetch_jitter,
        }
    }
}

pub use kills::KillCache;
