//! Concurrent TTL map
//!
//! Entries carry an absolute expiry. Reads treat expired entries as absent and
//! drop them lazily; `purge_expired` sweeps the rest. Keys are independent, so
//! writers to different keys never contend beyond their shard.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::clock::Clock;

/// Whether an update extends the entry's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Reset to `now + ttl` on every write
    Refresh,
    /// Keep the expiry set when the entry was created
    Keep,
}

struct Slot<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// Absolute expiry for a TTL starting now
pub fn expires_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub struct TtlStore<K, V> {
    entries: DashMap<K, Slot<V>>,
    clock: Arc<dyn Clock>,
}

impl<K, V> TtlStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Live value for `key`, if any
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        {
            let slot = self.entries.get(key)?;
            if slot.expires_at > now {
                return Some(slot.value.clone());
            }
        }
        // The read guard is released before taking the write lock
        self.entries.remove_if(key, |_, slot| slot.expires_at <= now);
        None
    }

    #[cfg(test)]
    pub fn contains(&self, key: &K) -> bool {
        let now = self.clock.now();
        self.entries
            .get(key)
            .is_some_and(|slot| slot.expires_at > now)
    }

    /// Expiry of a live entry
    #[cfg(test)]
    pub fn expires_at(&self, key: &K) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        self.entries
            .get(key)
            .filter(|slot| slot.expires_at > now)
            .map(|slot| slot.expires_at)
    }

    /// Store `value` for `ttl`, overwriting. Returns whether a live entry was replaced.
    pub fn put(&self, key: K, value: V, ttl: Duration) -> bool {
        let now = self.clock.now();
        let slot = Slot {
            value,
            expires_at: expires_after(now, ttl),
        };
        match self.entries.insert(key, slot) {
            Some(previous) => previous.expires_at > now,
            None => false,
        }
    }

    /// Atomically modify the value for `key`, creating it with `init` when
    /// absent or expired. Returns the value after `apply`.
    pub fn upsert<I, F>(&self, key: K, ttl: Duration, expiry: Expiry, init: I, apply: F) -> V
    where
        I: FnOnce() -> V,
        F: FnOnce(&mut V),
    {
        let now = self.clock.now();
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                if slot.expires_at <= now {
                    slot.value = init();
                    slot.expires_at = expires_after(now, ttl);
                } else if expiry == Expiry::Refresh {
                    slot.expires_at = expires_after(now, ttl);
                }
                apply(&mut slot.value);
                slot.value.clone()
            }
            Entry::Vacant(vacant) => {
                let mut value = init();
                apply(&mut value);
                vacant.insert(Slot {
                    value: value.clone(),
                    expires_at: expires_after(now, ttl),
                });
                value
            }
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, including not-yet-purged expired ones
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
