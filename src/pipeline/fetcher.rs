//! Cache-first killmail fetching
//!
//! Per-system fetches walk the upstream kill list newest first and stop at
//! the first kill older than the requested window, so old kills are neither
//! resolved nor stored.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};

use super::SystemKills;
use crate::cache::KillCache;
use crate::client::{KillListEntry, Killmail, KillmailApi, ZkbMeta, fetch_bounded};
use crate::config::FetchSettings;
use crate::error::Result;

/// Options for one per-system fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Maximum number of kills to collect
    pub limit: usize,
    /// Ignore the recency marker
    pub force: bool,
    /// Only kills from the last `since_hours` hours
    pub since_hours: u32,
    /// Pass over this many in-window kills before collecting
    pub skip: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            limit: 25,
            force: false,
            since_hours: 24,
            skip: 0,
        }
    }
}

/// Result of one per-system fetch
#[derive(Debug, Clone, Default)]
pub struct SystemFetch {
    pub kills: Vec<Killmail>,
    /// Upstream requests issued
    pub calls: usize,
}

pub struct Fetcher<C: KillmailApi> {
    api: Arc<C>,
    cache: Arc<KillCache>,
    settings: FetchSettings,
}

impl<C: KillmailApi> Clone for Fetcher<C> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            cache: self.cache.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<C: KillmailApi + 'static> Fetcher<C> {
    pub fn new(api: Arc<C>, cache: Arc<KillCache>, settings: FetchSettings) -> Self {
        Self {
            api,
            cache,
            settings,
        }
    }

    pub fn api(&self) -> &Arc<C> {
        &self.api
    }

    pub fn cache(&self) -> &Arc<KillCache> {
        &self.cache
    }

    /// Single killmail, from cache when present.
    ///
    /// A cache entry that fails to decode is bypassed with a direct fetch.
    pub async fn fetch_killmail(&self, killmail_id: u64) -> Result<Killmail> {
        match self.cache.get_killmail(killmail_id) {
            Ok(Some(killmail)) => {
                debug!("Cache hit: killmail {}", killmail_id);
                return Ok(killmail);
            }
            Ok(None) => debug!("Cache miss: killmail {}", killmail_id),
            Err(e) => warn!("{}; fetching killmail {} directly", e, killmail_id),
        }

        let body = self.api.get_killmail(killmail_id).await?;
        let killmail = Killmail::from_payload(body, None)?;
        self.store(&killmail);
        Ok(killmail)
    }

    /// Full killmail from ESI by id and hash, not cached.
    pub async fn fetch_esi_killmail(&self, killmail_id: u64, zkb: ZkbMeta) -> Result<Killmail> {
        let body = self.api.get_esi_killmail(killmail_id, &zkb.hash).await?;
        Ok(Killmail::from_payload(body, Some(zkb))?)
    }

    /// Recent kills for one system.
    ///
    /// Served from cache without any upstream call when the system was fetched
    /// recently and `force` is off.
    pub async fn fetch_kills_for_system(
        &self,
        system_id: u64,
        opts: FetchOptions,
    ) -> Result<SystemFetch> {
        if !opts.force && self.cache.recently_fetched(system_id) {
            debug!("System {} fetched recently, serving from cache", system_id);
            let mut kills = newest_first(self.cache.fetch_cached_kills(system_id));
            kills.truncate(opts.limit);
            return Ok(SystemFetch { kills, calls: 0 });
        }

        let cutoff = self.cache.now() - chrono::Duration::hours(i64::from(opts.since_hours));
        let mut kills = Vec::new();
        let mut calls = 0;
        let mut skipped = 0;

        'pages: for page in 1..=self.settings.max_pages.max(1) {
            if kills.len() >= opts.limit {
                break;
            }
            calls += 1;
            let entries = self.api.list_system_kills(system_id, page).await?;
            if entries.is_empty() {
                break;
            }

            for raw in entries {
                let entry = match KillListEntry::parse(raw) {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("Skipping kill list entry for system {}: {}", system_id, e);
                        continue;
                    }
                };
                let killmail_id = entry.id();
                let killmail = match self.resolve_entry(entry, &mut calls).await {
                    Ok(killmail) => killmail,
                    Err(e) => {
                        warn!("Skipping killmail {} in system {}: {}", killmail_id, system_id, e);
                        continue;
                    }
                };

                if !killmail.is_newer_than(cutoff) {
                    if self.settings.assume_sorted {
                        debug!(
                            "System {}: killmail {} is past the {}h window, stopping",
                            system_id, killmail.id, opts.since_hours
                        );
                        break 'pages;
                    }
                    continue;
                }

                self.store(&killmail);
                if skipped < opts.skip {
                    skipped += 1;
                    continue;
                }
                kills.push(killmail);
                if kills.len() >= opts.limit {
                    break 'pages;
                }
            }
        }

        if !self.settings.assume_sorted {
            kills = newest_first(kills);
        }

        self.cache.mark_fully_fetched(system_id);
        debug!(
            "System {}: {} kills in {} calls",
            system_id,
            kills.len(),
            calls
        );
        Ok(SystemFetch { kills, calls })
    }

    /// Fetch many systems with bounded concurrency.
    ///
    /// Returns one entry per system id; a failure only affects its own entry.
    pub async fn fetch_killmails_for_systems(
        &self,
        system_ids: Vec<u64>,
        opts: FetchOptions,
    ) -> HashMap<u64, Result<SystemFetch>> {
        let fetcher = self.clone();
        fetch_bounded(
            system_ids,
            move |system_id| {
                let fetcher = fetcher.clone();
                async move { fetcher.fetch_kills_for_system(system_id, opts).await }
            },
            self.settings.max_concurrency,
            Duration::from_secs(self.settings.call_timeout_secs),
        )
        .await
    }

    /// Turn a list entry into a full killmail, from cache or ESI when needed.
    async fn resolve_entry(&self, entry: KillListEntry, calls: &mut usize) -> Result<Killmail> {
        match entry {
            KillListEntry::Full(killmail) => Ok(killmail),
            KillListEntry::Partial { id, zkb } => {
                match self.cache.get_killmail(id) {
                    Ok(Some(killmail)) => return Ok(killmail),
                    Ok(None) => {}
                    Err(e) => warn!("{}; refetching killmail {}", e, id),
                }
                *calls += 1;
                self.fetch_esi_killmail(id, zkb).await
            }
        }
    }

    fn store(&self, killmail: &Killmail) {
        if let Err(e) = self.cache.store_killmail(killmail) {
            warn!("Could not cache killmail {}: {}", killmail.id, e);
        }
    }
}

#[async_trait]
impl<C: KillmailApi + 'static> SystemKills for Fetcher<C> {
    async fn fetch_kills_for_system(&self, system_id: u64, opts: FetchOptions) -> Result<SystemFetch> {
        Fetcher::fetch_kills_for_system(self, system_id, opts).await
    }

    fn cached_kills(&self, system_id: u64) -> Vec<Killmail> {
        newest_first(self.cache.fetch_cached_kills(system_id))
    }
}

fn newest_first(mut kills: Vec<Killmail>) -> Vec<Killmail> {
    kills.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
    kills
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheTtl;
    use crate::client::MockKillmailClient;
    use crate::client::fixtures::*;
    use crate::error::{ApiError, Error};
    use chrono::{Duration as ChronoDuration, Utc};

    type TestFetcher = (Fetcher<MockKillmailClient>, Arc<MockKillmailClient>);

    fn fetcher_with(mock: MockKillmailClient, settings: FetchSettings) -> TestFetcher {
        let api = Arc::new(mock);
        let cache = Arc::new(KillCache::new(CacheTtl::default()));
        (Fetcher::new(api.clone(), cache, settings), api)
    }

    fn fetcher(mock: MockKillmailClient) -> TestFetcher {
        fetcher_with(mock, FetchSettings::default())
    }

    fn hours_ago(hours: i64) -> chrono::DateTime<Utc> {
        Utc::now() - ChronoDuration::hours(hours)
    }

    #[tokio::test]
    async fn test_fetch_killmail_cache_first() {
        let mock = MockKillmailClient::new()
            .with_esi_killmail(esi_killmail(1, 30000142, Utc::now()))
            .await;
        let (fetcher, api) = fetcher(mock);

        let first = fetcher.fetch_killmail(1).await.unwrap();
        assert_eq!(first.system_id, 30000142);
        assert_eq!(first.zkb.as_ref().unwrap().hash, "hash1");

        let second = fetcher.fetch_killmail(1).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(api.call_counts().await.get_killmail, 1);
        assert_eq!(fetcher.cache().system_kill_ids(30000142), vec![1]);
    }

    #[tokio::test]
    async fn test_fetch_killmail_bypasses_corrupt_cache_entry() {
        let mock = MockKillmailClient::new()
            .with_esi_killmail(esi_killmail(4, 30000142, Utc::now()))
            .await;
        let (fetcher, api) = fetcher(mock);
        fetcher.cache().put_raw(4, b"\xff\xfe");

        let killmail = fetcher.fetch_killmail(4).await.unwrap();
        assert_eq!(killmail.id, 4);
        assert_eq!(api.call_counts().await.get_killmail, 1);
        // The direct fetch repaired the entry
        assert!(fetcher.cache().get_killmail(4).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_fetch_killmail_propagates_upstream_error() {
        let (fetcher, _api) = fetcher(MockKillmailClient::new());
        let err = fetcher.fetch_killmail(99).await.unwrap_err();
        assert!(matches!(err, Error::Api(ApiError::ClientError { status: 404, .. })));
    }

    #[tokio::test]
    async fn test_second_fetch_within_recency_window_is_free() {
        let mock = MockKillmailClient::new()
            .with_system_page(7, vec![partial_entry(1), partial_entry(2)])
            .await
            .with_esi_killmail(esi_killmail(1, 7, hours_ago(0)))
            .await
            .with_esi_killmail(esi_killmail(2, 7, hours_ago(0)))
            .await;
        let (fetcher, api) = fetcher(mock);
        let opts = FetchOptions::default();

        let first = fetcher.fetch_kills_for_system(7, opts).await.unwrap();
        assert_eq!(first.kills.len(), 2);
        assert_eq!(first.calls, 3);
        let after_first = api.call_counts().await.total();

        let second = fetcher.fetch_kills_for_system(7, opts).await.unwrap();
        assert_eq!(second.calls, 0);
        assert_eq!(second.kills.len(), 2);
        assert_eq!(api.call_counts().await.total(), after_first);
    }

    #[tokio::test]
    async fn test_force_ignores_recency_marker() {
        let mock = MockKillmailClient::new()
            .with_system_page(7, vec![full_entry(1, 7, Utc::now())])
            .await;
        let (fetcher, api) = fetcher(mock);
        let opts = FetchOptions::default();

        fetcher.fetch_kills_for_system(7, opts).await.unwrap();
        let forced = FetchOptions { force: true, ..opts };
        let again = fetcher.fetch_kills_for_system(7, forced).await.unwrap();

        assert_eq!(again.calls, 1);
        assert_eq!(api.call_counts().await.list_system_kills, 2);
    }

    #[tokio::test]
    async fn test_early_exit_at_first_stale_kill() {
        // Newest first: k1 and k2 inside a 50h window, k3 outside, k4 after it
        let mock = MockKillmailClient::new()
            .with_system_page(
                7,
                vec![
                    full_entry(1, 7, hours_ago(0)),
                    full_entry(2, 7, hours_ago(10)),
                    full_entry(3, 7, hours_ago(60)),
                    partial_entry(4),
                ],
            )
            .await
            .with_esi_killmail(esi_killmail(4, 7, hours_ago(1)))
            .await;
        let (fetcher, api) = fetcher(mock);
        let opts = FetchOptions {
            since_hours: 50,
            ..FetchOptions::default()
        };

        let result = fetcher.fetch_kills_for_system(7, opts).await.unwrap();
        let ids: Vec<_> = result.kills.iter().map(|k| k.id).collect();
        assert_eq!(ids, vec![1, 2]);

        // Nothing at or past the stale kill is stored or resolved
        assert!(fetcher.cache().get_killmail(3).unwrap().is_none());
        assert!(api.esi_requests().await.is_empty());
        assert_eq!(fetcher.cache().system_kill_ids(7), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_unsorted_lists_are_filtered_not_cut() {
        let mock = MockKillmailClient::new()
            .with_system_page(
                7,
                vec![
                    full_entry(1, 7, hours_ago(30)),
                    full_entry(2, 7, hours_ago(2)),
                    full_entry(3, 7, hours_ago(1)),
                ],
            )
            .await;
        let settings = FetchSettings {
            assume_sorted: false,
            ..FetchSettings::default()
        };
        let (fetcher, _api) = fetcher_with(mock, settings);
        let opts = FetchOptions {
            since_hours: 24,
            ..FetchOptions::default()
        };

        let result = fetcher.fetch_kills_for_system(7, opts).await.unwrap();
        let ids: Vec<_> = result.kills.iter().map(|k| k.id).collect();
        assert_eq!(ids, vec![3, 2]);
    }

    #[tokio::test]
    async fn test_limit_stops_the_walk() {
        let mock = MockKillmailClient::new()
            .with_system_page(7, vec![partial_entry(1), partial_entry(2)])
            .await
            .with_esi_killmail(esi_killmail(1, 7, hours_ago(0)))
            .await
            .with_esi_killmail(esi_killmail(2, 7, hours_ago(0)))
            .await;
        let (fetcher, api) = fetcher(mock);
        let opts = FetchOptions {
            limit: 1,
            ..FetchOptions::default()
        };

        let result = fetcher.fetch_kills_for_system(7, opts).await.unwrap();
        assert_eq!(result.kills.len(), 1);
        assert_eq!(api.esi_requests().await, vec![1]);
    }

    #[tokio::test]
    async fn test_skip_passes_over_leading_kills() {
        let mock = MockKillmailClient::new()
            .with_system_page(
                7,
                vec![
                    full_entry(1, 7, hours_ago(0)),
                    full_entry(2, 7, hours_ago(1)),
                    full_entry(3, 7, hours_ago(2)),
                ],
            )
            .await;
        let (fetcher, _api) = fetcher(mock);
        let opts = FetchOptions {
            skip: 1,
            limit: 1,
            ..FetchOptions::default()
        };

        let result = fetcher.fetch_kills_for_system(7, opts).await.unwrap();
        let ids: Vec<_> = result.kills.iter().map(|k| k.id).collect();
        assert_eq!(ids, vec![2]);
    }

    #[tokio::test]
    async fn test_bad_entries_are_skipped() {
        let mock = MockKillmailClient::new()
            .with_system_page(
                7,
                vec![
                    serde_json::json!({"garbage": true}),
                    partial_entry(2),
                    full_entry(3, 7, hours_ago(0)),
                ],
            )
            .await;
        // No ESI body registered for 2, so its resolution fails
        let (fetcher, _api) = fetcher(mock);

        let result = fetcher
            .fetch_kills_for_system(7, FetchOptions::default())
            .await
            .unwrap();
        let ids: Vec<_> = result.kills.iter().map(|k| k.id).collect();
        assert_eq!(ids, vec![3]);
        assert!(fetcher.cache().recently_fetched(7));
    }

    #[tokio::test]
    async fn test_pages_are_walked_up_to_max_pages() {
        let mock = MockKillmailClient::new()
            .with_system_page(7, vec![full_entry(1, 7, hours_ago(0))])
            .await
            .with_system_page(7, vec![full_entry(2, 7, hours_ago(1))])
            .await
            .with_system_page(7, vec![full_entry(3, 7, hours_ago(2))])
            .await;
        let settings = FetchSettings {
            max_pages: 2,
            ..FetchSettings::default()
        };
        let (fetcher, api) = fetcher_with(mock, settings);

        let result = fetcher
            .fetch_kills_for_system(7, FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(result.kills.len(), 2);
        assert_eq!(api.call_counts().await.list_system_kills, 2);
    }

    #[tokio::test]
    async fn test_limit_reached_on_page_end_skips_next_page() {
        let mock = MockKillmailClient::new()
            .with_system_page(7, vec![full_entry(1, 7, hours_ago(0))])
            .await
            .with_system_page(7, vec![full_entry(2, 7, hours_ago(1))])
            .await;
        let settings = FetchSettings {
            max_pages: 5,
            ..FetchSettings::default()
        };
        let (fetcher, api) = fetcher_with(mock, settings);

        let opts = FetchOptions {
            limit: 1,
            ..FetchOptions::default()
        };
        let result = fetcher.fetch_kills_for_system(7, opts).await.unwrap();
        assert_eq!(result.kills.len(), 1);
        assert_eq!(result.calls, 1);
        assert_eq!(api.call_counts().await.list_system_kills, 1);
    }

    #[tokio::test]
    async fn test_list_failure_does_not_mark_system() {
        let mock = MockKillmailClient::new().with_failing_system(7).await;
        let (fetcher, _api) = fetcher(mock);

        assert!(fetcher.fetch_kills_for_system(7, FetchOptions::default()).await.is_err());
        assert!(!fetcher.cache().recently_fetched(7));
    }

    #[tokio::test]
    async fn test_batch_contains_one_entry_per_system() {
        let mut mock = MockKillmailClient::new();
        for system_id in 1..=10u64 {
            mock = mock
                .with_system_page(system_id, vec![full_entry(system_id * 100, system_id, hours_ago(0))])
                .await;
        }
        let mock = mock.with_failing_system(4).await.with_failing_system(9).await;
        let (fetcher, _api) = fetcher(mock);

        let results = fetcher
            .fetch_killmails_for_systems((1..=10).collect(), FetchOptions::default())
            .await;

        assert_eq!(results.len(), 10);
        assert_eq!(results.values().filter(|r| r.is_err()).count(), 2);
        assert_eq!(results.values().filter(|r| r.is_ok()).count(), 8);
        assert!(results[&4].is_err());
        assert_eq!(results[&5].as_ref().unwrap().kills[0].id, 500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_timeout_is_a_failed_entry() {
        let mock = MockKillmailClient::new()
            .with_system_page(1, vec![partial_entry(10)])
            .await
            .with_esi_killmail(esi_killmail(10, 1, Utc::now()))
            .await
            .with_esi_delay(Duration::from_secs(120))
            .await
            .with_system_page(2, vec![full_entry(20, 2, Utc::now())])
            .await;
        let (fetcher, _api) = fetcher(mock);

        let results = fetcher
            .fetch_killmails_for_systems(vec![1, 2], FetchOptions::default())
            .await;

        assert!(matches!(results[&1], Err(Error::Api(ApiError::Timeout(_)))));
        assert!(results[&2].is_ok());
    }

    #[tokio::test]
    async fn test_fetch_esi_killmail_keeps_zkb() {
        let mock = MockKillmailClient::new()
            .with_esi_killmail(esi_killmail(8, 30000142, Utc::now()))
            .await;
        let (fetcher, _api) = fetcher(mock);
        let meta: ZkbMeta = serde_json::from_value(zkb(8)).unwrap();

        let killmail = fetcher.fetch_esi_killmail(8, meta.clone()).await.unwrap();
        assert_eq!(killmail.zkb, Some(meta));
        assert!(fetcher.cache().get_killmail(8).unwrap().is_none());
    }
}
