//! RedisQ listener
//!
//! One sequential poll loop per queue. The interval adapts to traffic: fast
//! right after a kill, idle when the queue is empty, and exponentially backed
//! off while polls fail. Reference-only packages are resolved by detached
//! follow-up tasks so a slow ESI call never holds up the next poll.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::sync::{Semaphore, watch};

use super::Fetcher;
use crate::broadcast::{
    BroadcastEvent, Broadcaster, KILL_COUNT_UPDATE, KILLMAIL_RECEIVED, system_topic,
};
use crate::cache::KillCache;
use crate::client::{Killmail, KillmailApi, RedisqPackage, ZkbMeta};
use crate::config::RealtimeSettings;
use crate::error::{Error, Result};

/// Length of the derived queue id
const QUEUE_ID_LEN: usize = 24;

/// Stable queue id for a deployment secret: hex SHA-256, truncated.
pub fn derive_queue_id(secret: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(secret.as_bytes()));
    digest[..QUEUE_ID_LEN].to_string()
}

/// Scheduling state of the poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Queue was empty
    Idle,
    /// A kill just arrived
    Fast,
    /// The last `n` polls failed
    Backoff(u32),
}

pub struct RealtimeListener<C: KillmailApi> {
    fetcher: Fetcher<C>,
    broadcaster: Arc<dyn Broadcaster>,
    queue_id: String,
    settings: RealtimeSettings,
    follow_ups: Arc<Semaphore>,
    state: PollState,
    backoff: Duration,
}

impl<C: KillmailApi + 'static> RealtimeListener<C> {
    pub fn new(
        fetcher: Fetcher<C>,
        broadcaster: Arc<dyn Broadcaster>,
        queue_id: String,
        settings: RealtimeSettings,
    ) -> Self {
        let follow_ups = Arc::new(Semaphore::new(settings.max_follow_ups.max(1)));
        let backoff = Duration::from_millis(settings.initial_backoff_ms);
        Self {
            fetcher,
            broadcaster,
            queue_id,
            settings,
            follow_ups,
            state: PollState::Idle,
            backoff,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Poll once, handle the result and return the delay before the next poll.
    pub async fn poll_once(&mut self) -> Duration {
        match self.poll().await {
            Ok(got_kill) => {
                self.backoff = Duration::from_millis(self.settings.initial_backoff_ms);
                if got_kill {
                    self.state = PollState::Fast;
                    Duration::from_millis(self.settings.fast_interval_ms)
                } else {
                    self.state = PollState::Idle;
                    Duration::from_millis(self.settings.idle_interval_ms)
                }
            }
            Err(e) => {
                let failures = match self.state {
                    PollState::Backoff(n) => n.saturating_add(1),
                    _ => 1,
                };
                let max = Duration::from_millis(self.settings.max_backoff_ms);
                self.backoff = self.backoff.mul_f64(self.settings.backoff_factor).min(max);
                self.state = PollState::Backoff(failures);
                warn!(
                    "RedisQ poll failed ({} in a row), retrying in {:?}: {}",
                    failures, self.backoff, e
                );
                self.backoff
            }
        }
    }

    /// Poll until `shutdown` fires or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Listening on RedisQ queue {}", self.queue_id);
        loop {
            let delay = tokio::select! {
                delay = self.poll_once() => delay,
                _ = shutdown.changed() => break,
            };
            debug!("Next RedisQ poll in {:?} ({:?})", delay, self.state());
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("RedisQ listener stopped");
    }

    /// Returns whether the poll delivered a kill.
    async fn poll(&mut self) -> Result<bool> {
        let body = self.fetcher.api().poll_redisq(&self.queue_id).await?;
        match RedisqPackage::decode(body)? {
            RedisqPackage::Empty => Ok(false),
            RedisqPackage::Inline(killmail) => {
                debug!("RedisQ delivered killmail {}", killmail.id);
                ingest(self.fetcher.cache(), self.broadcaster.as_ref(), &killmail);
                Ok(true)
            }
            RedisqPackage::Reference { id, zkb } => {
                debug!("RedisQ referenced killmail {}, fetching", id);
                self.spawn_follow_up(id, zkb);
                Ok(true)
            }
        }
    }

    /// Resolve a referenced killmail off the poll loop.
    fn spawn_follow_up(&self, killmail_id: u64, zkb: ZkbMeta) {
        let fetcher = self.fetcher.clone();
        let broadcaster = self.broadcaster.clone();
        let permits = self.follow_ups.clone();
        let timeout = Duration::from_secs(self.settings.follow_up_timeout_secs);

        let task = tokio::spawn(async move {
            // The timeout covers waiting for a permit as well as the fetch
            let fetch = async {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::Other(format!("follow-up pool closed: {}", e)))?;
                fetcher.fetch_esi_killmail(killmail_id, zkb).await
            };
            match tokio::time::timeout(timeout, fetch).await {
                Ok(Ok(killmail)) => ingest(fetcher.cache(), broadcaster.as_ref(), &killmail),
                Ok(Err(e)) => warn!("Follow-up fetch for killmail {} failed: {}", killmail_id, e),
                Err(_) => warn!(
                    "Follow-up fetch for killmail {} timed out after {:?}",
                    killmail_id, timeout
                ),
            }
        });

        tokio::spawn(async move {
            if let Err(e) = task.await
                && e.is_panic()
            {
                error!("Follow-up fetch for killmail {} panicked", killmail_id);
            }
        });
    }
}

/// Store a killmail and announce it on its system topic.
fn ingest(cache: &KillCache, broadcaster: &dyn Broadcaster, killmail: &Killmail) {
    if let Err(e) = cache.store_killmail(killmail) {
        warn!("Could not cache killmail {}: {}", killmail.id, e);
        return;
    }

    let topic = system_topic(killmail.system_id);
    match serde_json::to_value(killmail) {
        Ok(payload) => broadcaster.broadcast(&topic, BroadcastEvent::new(KILLMAIL_RECEIVED, payload)),
        Err(e) => warn!("Could not serialize killmail {}: {}", killmail.id, e),
    }

    let count = cache.get_kill_count(killmail.system_id);
    broadcaster.broadcast(
        &topic,
        BroadcastEvent::new(
            KILL_COUNT_UPDATE,
            json!({ "system_id": killmail.system_id, "count": count }),
        ),
    );
}
