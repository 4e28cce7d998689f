//! Killmail cache shared by the fetch and realtime paths
//!
//! Killmails are stored as serialized JSON so a damaged entry surfaces as a
//! decode error instead of silently vanishing.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use rand::Rng;

use super::CacheTtl;
use super::clock::{Clock, SystemClock};
use super::storage::{Expiry, TtlStore, expires_after};
use crate::client::Killmail;
use crate::error::CacheError;

/// Kills newer than this many minutes count toward a system's kill count
const KILL_COUNT_WINDOW_MINS: i64 = 60;

/// Scale `base` by a random factor in `[1 - fraction, 1 + fraction]`.
pub fn jittered_duration(base: Duration, fraction: f64) -> Duration {
    if fraction <= 0.0 {
        return base;
    }
    let spread = rand::thread_rng().gen_range(-fraction..=fraction);
    base.mul_f64(1.0 + spread)
}

/// Entry counts per store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub killmails: usize,
    pub indexed_systems: usize,
    pub counted_systems: usize,
    pub fetch_markers: usize,
}

pub struct KillCache {
    killmails: TtlStore<u64, Vec<u8>>,
    system_index: TtlStore<u64, Vec<u64>>,
    kill_counts: TtlStore<u64, u64>,
    fetch_markers: TtlStore<u64, DateTime<Utc>>,
    ttl: CacheTtl,
    clock: Arc<dyn Clock>,
}

impl KillCache {
    pub fn new(ttl: CacheTtl) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: CacheTtl, clock: Arc<dyn Clock>) -> Self {
        Self {
            killmails: TtlStore::new(clock.clone()),
            system_index: TtlStore::new(clock.clone()),
            kill_counts: TtlStore::new(clock.clone()),
            fetch_markers: TtlStore::new(clock.clone()),
            ttl,
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ========================================================================
    // Killmails
    // ========================================================================

    /// Store a killmail, overwriting any entry with the same id.
    /// Returns whether the id was not already live in the cache.
    pub fn put_killmail(&self, killmail: &Killmail) -> Result<bool, CacheError> {
        let bytes = serde_json::to_vec(killmail).map_err(|e| CacheError::Encode {
            key: killmail_key(killmail.id),
            reason: e.to_string(),
        })?;
        let replaced = self.killmails.put(killmail.id, bytes, self.ttl.killmail);
        Ok(!replaced)
    }

    pub fn get_killmail(&self, killmail_id: u64) -> Result<Option<Killmail>, CacheError> {
        let Some(bytes) = self.killmails.get(&killmail_id) else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CacheError::Corrupt {
                key: killmail_key(killmail_id),
                reason: e.to_string(),
            })
    }

    /// Killmails indexed for a system, in index order.
    ///
    /// Ids whose killmail expired or no longer decodes are skipped.
    pub fn fetch_cached_kills(&self, system_id: u64) -> Vec<Killmail> {
        self.system_kill_ids(system_id)
            .into_iter()
            .filter_map(|id| match self.get_killmail(id) {
                Ok(found) => found,
                Err(e) => {
                    warn!("Dropping cached kill {} for system {}: {}", id, system_id, e);
                    None
                }
            })
            .collect()
    }

    /// Raw index contents for a system
    pub fn system_kill_ids(&self, system_id: u64) -> Vec<u64> {
        self.system_index.get(&system_id).unwrap_or_default()
    }

    /// Append `killmail_id` to the system index unless already present.
    /// Every call refreshes the index lifetime.
    pub fn add_id_to_system_index(&self, system_id: u64, killmail_id: u64) {
        self.system_index.upsert(
            system_id,
            self.ttl.system_index,
            Expiry::Refresh,
            Vec::new,
            |ids| {
                if !ids.contains(&killmail_id) {
                    ids.push(killmail_id);
                }
            },
        );
    }

    /// Store a killmail and index it under its system.
    ///
    /// Bumps the system's kill count when the killmail was not already cached
    /// and happened within the last hour. Returns whether it was new.
    pub fn store_killmail(&self, killmail: &Killmail) -> Result<bool, CacheError> {
        let is_new = self.put_killmail(killmail)?;
        self.add_id_to_system_index(killmail.system_id, killmail.id);

        let recent_cutoff = self.now() - chrono::Duration::minutes(KILL_COUNT_WINDOW_MINS);
        if is_new && killmail.is_newer_than(recent_cutoff) {
            self.incr_kill_count(killmail.system_id, 1);
        }
        Ok(is_new)
    }

    // ========================================================================
    // Kill counts
    // ========================================================================

    /// Add `n` to the system's kill count. The count expires one TTL after it
    /// was first created.
    pub fn incr_kill_count(&self, system_id: u64, n: u64) -> u64 {
        self.kill_counts.upsert(
            system_id,
            self.ttl.kill_count,
            Expiry::Keep,
            || 0,
            |count| *count = count.saturating_add(n),
        )
    }

    pub fn get_kill_count(&self, system_id: u64) -> u64 {
        self.kill_counts.get(&system_id).unwrap_or(0)
    }

    // ========================================================================
    // Recency markers
    // ========================================================================

    pub fn recently_fetched(&self, system_id: u64) -> bool {
        self.fetch_markers
            .get(&system_id)
            .is_some_and(|expires_at| self.now() < expires_at)
    }

    /// Mark the system as freshly fetched for a jittered recency window.
    /// Returns when the marker lapses.
    pub fn mark_fully_fetched(&self, system_id: u64) -> DateTime<Utc> {
        let ttl = jittered_duration(self.ttl.recent_fetch, self.ttl.recent_fetch_jitter);
        let expires_at = expires_after(self.now(), ttl);
        self.fetch_markers.put(system_id, expires_at, ttl);
        debug!("System {} marked fetched for {:?}", system_id, ttl);
        expires_at
    }

    // ========================================================================
    // Housekeeping
    // ========================================================================

    /// Sweep expired entries from every store. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let removed = self.killmails.purge_expired()
            + self.system_index.purge_expired()
            + self.kill_counts.purge_expired()
            + self.fetch_markers.purge_expired();
        if removed > 0 {
            debug!("Purged {} expired cache entries", removed);
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            killmails: self.killmails.len(),
            indexed_systems: self.system_index.len(),
            counted_systems: self.kill_counts.len(),
            fetch_markers: self.fetch_markers.len(),
        }
    }

    #[cfg(test)]
    pub(crate) fn put_raw(&self, killmail_id: u64, bytes: &[u8]) {
        self.killmails
            .put(killmail_id, bytes.to_vec(), self.ttl.killmail);
    }
}

fn killmail_key(killmail_id: u64) -> String {
    format!("killmail:{}", killmail_id)
}
