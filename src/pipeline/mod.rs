//! Killmail ingestion: on-demand fetching, background preloading and the
//! realtime listener

use async_trait::async_trait;

use crate::client::Killmail;
use crate::error::Result;

pub mod fetcher;
pub mod preloader;
pub mod realtime;

pub use fetcher::{FetchOptions, Fetcher, SystemFetch};
pub use preloader::{PreloadReport, Preloader};
pub use realtime::{RealtimeListener, derive_queue_id};

/// Per-system kill fetching as the preloader sees it
#[async_trait]
pub trait SystemKills: Send + Sync {
    async fn fetch_kills_for_system(&self, system_id: u64, opts: FetchOptions) -> Result<SystemFetch>;

    /// Cached kills for a system, newest first
    fn cached_kills(&self, system_id: u64) -> Vec<Killmail>;
}
