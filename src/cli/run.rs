//! Long-running pipeline: preloader, realtime listener and cache sweeper

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::broadcast::{Broadcaster, LogBroadcaster};
use crate::cache::KillCache;
use crate::cli::CommandContext;
use crate::cli::args::GlobalOptions;
use crate::error::Result;
use crate::maps::StaticMapSource;
use crate::pipeline::preloader::PreloadHandle;
use crate::pipeline::{Preloader, RealtimeListener, derive_queue_id};

/// Run until Ctrl-C, then stop every background task
pub async fn run(opts: &GlobalOptions, no_preload: bool, no_realtime: bool) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let broadcaster: Arc<dyn Broadcaster> = Arc::new(LogBroadcaster);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Resolve the secret before anything starts so a bad config fails fast
    let listener = if ctx.config.realtime.enabled && !no_realtime {
        let queue_id = derive_queue_id(ctx.config.require_queue_secret()?);
        Some(RealtimeListener::new(
            ctx.fetcher.clone(),
            broadcaster.clone(),
            queue_id,
            ctx.config.realtime.clone(),
        ))
    } else {
        info!("Realtime listener disabled");
        None
    };

    let preload = if ctx.config.preload.enabled && !no_preload {
        let preloader = Arc::new(Preloader::new(
            Arc::new(ctx.fetcher.clone()),
            Arc::new(StaticMapSource::new(ctx.config.maps.clone())),
            broadcaster.clone(),
            ctx.config.preload.clone(),
        ));
        Some(preloader.spawn())
    } else {
        info!("Preloader disabled");
        None
    };

    let listener_task = listener.map(|l| tokio::spawn(l.run(shutdown_rx.clone())));

    let sweeper = spawn_sweeper(
        ctx.cache.clone(),
        Duration::from_secs(ctx.config.cache.purge_interval_secs.max(1)),
        shutdown_rx,
    );

    info!("killfeed running, press Ctrl-C to stop");
    wait_for_shutdown(preload.as_ref()).await?;
    info!("Shutting down");

    let _ = shutdown_tx.send(true);
    if let Some(handle) = preload {
        handle.shutdown().await;
    }
    join("realtime listener", listener_task).await;
    join("cache sweeper", Some(sweeper)).await;

    let stats = ctx.cache.stats();
    info!(
        "Final cache: {} killmails, {} indexed systems",
        stats.killmails, stats.indexed_systems
    );
    Ok(())
}

/// Wait for Ctrl-C. On unix, SIGHUP re-runs the preloader right away.
#[cfg(unix)]
async fn wait_for_shutdown(preload: Option<&PreloadHandle>) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => return Ok(result?),
            _ = hangup.recv() => match preload {
                Some(handle) => {
                    info!("SIGHUP received, refreshing preload");
                    handle.trigger();
                }
                None => info!("SIGHUP received, but the preloader is disabled"),
            },
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_preload: Option<&PreloadHandle>) -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

/// Drop expired cache entries on a fixed interval
fn spawn_sweeper(
    cache: Arc<KillCache>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // Skip the immediate first tick
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let purged = cache.purge_expired();
                    let stats = cache.stats();
                    debug!(
                        "Purged {} expired entries ({} killmails, {} fetch markers left)",
                        purged, stats.killmails, stats.fetch_markers
                    );
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

async fn join(name: &str, task: Option<JoinHandle<()>>) {
    if let Some(task) = task
        && let Err(e) = task.await
    {
        warn!("{} ended abnormally: {}", name, e);
    }
}
