//! Two-phase background preloading of recent kills for active maps
//!
//! The quick pass asks "is anything happening right now" with one kill per
//! system and honors recency markers. The expanded pass ignores them and
//! fills each system up to the expanded limit, widening the window once when
//! the recent hour is too quiet. Each pass ends in a single broadcast.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::{Map, Value, json};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use super::{FetchOptions, SystemFetch, SystemKills};
use crate::broadcast::{
    BroadcastEvent, Broadcaster, DETAILED_KILLS_UPDATED, FetchType, PRELOAD_TOPIC,
};
use crate::client::fetch_bounded;
use crate::config::PreloadSettings;
use crate::error::Result;
use crate::maps::MapSource;

/// A system to preload and the map it was found on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub map_id: String,
    pub system_id: u64,
}

/// Outcome of one preload phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadReport {
    pub fetch_type: FetchType,
    pub systems: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Upstream requests issued by this phase
    pub calls: usize,
}

pub struct Preloader<S: SystemKills> {
    kills: Arc<S>,
    maps: Arc<dyn MapSource>,
    broadcaster: Arc<dyn Broadcaster>,
    settings: PreloadSettings,
    total_calls: AtomicUsize,
}

impl<S: SystemKills + 'static> Preloader<S> {
    pub fn new(
        kills: Arc<S>,
        maps: Arc<dyn MapSource>,
        broadcaster: Arc<dyn Broadcaster>,
        settings: PreloadSettings,
    ) -> Self {
        Self {
            kills,
            maps,
            broadcaster,
            settings,
            total_calls: AtomicUsize::new(0),
        }
    }

    /// Upstream calls made by every phase so far
    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::Relaxed)
    }

    /// Systems on maps active within the window, deduplicated by system.
    ///
    /// Falls back to the most recently updated map when none are active. When
    /// a system is visible on several maps, the first map wins.
    pub async fn select_candidates(&self) -> Result<Vec<Candidate>> {
        let since =
            chrono::Utc::now() - chrono::Duration::minutes(self.settings.active_window_mins);
        let mut maps = self.maps.active_maps(since).await?;

        if maps.is_empty() {
            match self.maps.latest_map().await? {
                Some(latest) => {
                    debug!(
                        "No maps active in the last {} minutes, using {}",
                        self.settings.active_window_mins, latest.id
                    );
                    maps.push(latest);
                }
                None => return Ok(Vec::new()),
            }
        }

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for map in maps {
            let systems = match self.maps.visible_systems(&map.id).await {
                Ok(systems) => systems,
                Err(e) => {
                    warn!("Could not read systems for map {}: {}", map.id, e);
                    continue;
                }
            };
            for system_id in systems {
                if seen.insert(system_id) {
                    candidates.push(Candidate {
                        map_id: map.id.clone(),
                        system_id,
                    });
                }
            }
        }

        Ok(candidates)
    }

    /// One kill per system from the last hour, honoring recency markers
    pub async fn quick_pass(&self, candidates: &[Candidate]) -> PreloadReport {
        let opts = FetchOptions {
            limit: self.settings.quick_limit,
            force: false,
            since_hours: self.settings.quick_since_hours,
            skip: 0,
        };

        let kills = self.kills.clone();
        let results = fetch_bounded(
            system_ids(candidates),
            move |system_id| {
                let kills = kills.clone();
                async move { kills.fetch_kills_for_system(system_id, opts).await }
            },
            self.settings.max_concurrency,
            self.task_timeout(),
        )
        .await;

        self.finish_phase(FetchType::Quick, candidates, results)
    }

    /// Up to the expanded limit per system, widening the window once when short
    pub async fn expanded_pass(&self, candidates: &[Candidate]) -> PreloadReport {
        let kills = self.kills.clone();
        let settings = self.settings.clone();
        let results = fetch_bounded(
            system_ids(candidates),
            move |system_id| {
                let kills = kills.clone();
                let settings = settings.clone();
                async move { expand_system(kills, system_id, &settings).await }
            },
            self.settings.max_concurrency,
            self.task_timeout(),
        )
        .await;

        self.finish_phase(FetchType::Expanded, candidates, results)
    }

    /// Select candidates, then run the quick and expanded passes.
    ///
    /// Returns no reports when there is nothing to preload.
    pub async fn run_once(&self) -> Result<Vec<PreloadReport>> {
        let candidates = self.select_candidates().await?;
        if candidates.is_empty() {
            info!("Preload: no candidate systems");
            return Ok(Vec::new());
        }

        info!("Preload: {} candidate systems", candidates.len());
        let quick = self.quick_pass(&candidates).await;
        let expanded = self.expanded_pass(&candidates).await;
        Ok(vec![quick, expanded])
    }

    /// Run at startup, then on every trigger or refresh interval until shut down.
    pub fn spawn(self: Arc<Self>) -> PreloadHandle {
        let trigger = Arc::new(Notify::new());
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let refresh = Duration::from_secs(self.settings.refresh_interval_secs.max(1));

        let notified = trigger.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(refresh);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                // The first tick completes immediately
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = notified.notified() => {
                        debug!("Preload triggered");
                        interval.reset();
                    }
                    _ = shutdown_rx.changed() => break,
                }

                tokio::select! {
                    result = self.run_once() => match result {
                        Ok(_) => debug!(
                            "Preload run finished, {} upstream calls since start",
                            self.total_calls()
                        ),
                        Err(e) => warn!("Preload run failed: {}", e),
                    },
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("Preloader stopped");
        });

        PreloadHandle {
            trigger,
            shutdown: shutdown_tx,
            task,
        }
    }

    fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.task_timeout_secs)
    }

    /// Aggregate per-system results, account calls and broadcast once.
    fn finish_phase(
        &self,
        fetch_type: FetchType,
        candidates: &[Candidate],
        mut results: HashMap<u64, Result<SystemFetch>>,
    ) -> PreloadReport {
        let mut systems = Map::new();
        let mut report = PreloadReport {
            fetch_type,
            systems: candidates.len(),
            succeeded: 0,
            failed: 0,
            calls: 0,
        };

        for candidate in candidates {
            match results.remove(&candidate.system_id) {
                Some(Ok(fetch)) => {
                    report.succeeded += 1;
                    report.calls += fetch.calls;
                    systems.insert(
                        candidate.system_id.to_string(),
                        json!({ "map_id": candidate.map_id, "kills": fetch.kills }),
                    );
                }
                Some(Err(e)) => {
                    report.failed += 1;
                    warn!("{} preload failed for system {}: {}", fetch_type, candidate.system_id, e);
                }
                None => report.failed += 1,
            }
        }

        let total = self.total_calls.fetch_add(report.calls, Ordering::Relaxed) + report.calls;
        info!(
            "{} preload: {}/{} systems, {} calls ({} total)",
            fetch_type, report.succeeded, report.systems, report.calls, total
        );

        let payload = json!({ "systems": Value::Object(systems), "calls": report.calls });
        self.broadcaster.broadcast(
            PRELOAD_TOPIC,
            BroadcastEvent::new(DETAILED_KILLS_UPDATED, payload).with_fetch_type(fetch_type),
        );

        report
    }
}

/// Expanded fetch for one system.
///
/// When the recent window yields fewer than the limit, one follow-up fetch
/// asks the wider window for the shortfall. The result is the cached index,
/// newest first, capped at the limit.
async fn expand_system<S: SystemKills>(
    kills: Arc<S>,
    system_id: u64,
    settings: &PreloadSettings,
) -> Result<SystemFetch> {
    let limit = settings.expanded_limit;
    let recent = kills
        .fetch_kills_for_system(
            system_id,
            FetchOptions {
                limit,
                force: true,
                since_hours: settings.expanded_since_hours,
                skip: 0,
            },
        )
        .await?;

    let mut calls = recent.calls;
    let found = recent.kills.len();
    if found < limit {
        let needed = limit - found;
        debug!(
            "System {}: {} kills in {}h, asking {}h for {} more",
            system_id, found, settings.expanded_since_hours, settings.expanded_fallback_hours, needed
        );
        let wider = FetchOptions {
            limit: needed,
            force: true,
            since_hours: settings.expanded_fallback_hours,
            skip: found,
        };
        match kills.fetch_kills_for_system(system_id, wider).await {
            Ok(more) => calls += more.calls,
            Err(e) => warn!("Widened fetch for system {} failed: {}", system_id, e),
        }
    }

    let mut cached = kills.cached_kills(system_id);
    cached.truncate(limit);
    Ok(SystemFetch {
        kills: cached,
        calls,
    })
}

fn system_ids(candidates: &[Candidate]) -> Vec<u64> {
    candidates.iter().map(|c| c.system_id).collect()
}

/// Control handle for a spawned preloader
pub struct PreloadHandle {
    trigger: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PreloadHandle {
    /// Run both passes again as soon as the current run finishes
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("Preloader task ended abnormally: {}", e);
        }
    }
}
