//! Command execution context
//!
//! Builds the shared pipeline pieces every networked command needs: config,
//! the process-wide rate limiter set, the upstream client, the cache and the
//! fetcher on top of them.

use std::sync::Arc;

use crate::cache::{CacheTtl, KillCache};
use crate::cli::{GlobalOptions, OutputFormat};
use crate::client::{RateLimitedClient, RateLimiterSet, RetryPolicy, ZkbClient};
use crate::config::Config;
use crate::error::Result;
use crate::pipeline::Fetcher;

/// Context for command execution containing config, pipeline and output options.
pub struct CommandContext {
    /// Loaded and validated configuration
    pub config: Config,
    /// Cache shared by every ingestion path
    pub cache: Arc<KillCache>,
    /// Cache-first fetcher over the rate-limited upstream client
    pub fetcher: Fetcher<ZkbClient>,
    /// Output format preference
    pub format: OutputFormat,
}

impl CommandContext {
    /// Load config and wire up the pipeline.
    ///
    /// # Errors
    /// Returns error if config cannot be loaded or is invalid, or the HTTP
    /// client cannot be built.
    pub fn new(opts: &GlobalOptions) -> Result<Self> {
        let config = Config::load_at(opts.config_ref())?;

        let limiters = Arc::new(RateLimiterSet::new(&config.buckets()));
        let retry = RetryPolicy::from(&config.retry);
        let http = RateLimitedClient::new(&config.api, limiters, retry)?;
        let api = Arc::new(ZkbClient::new(
            http,
            &config.api,
            config.realtime.time_to_wait_secs,
        ));

        let cache = Arc::new(KillCache::new(CacheTtl::from(&config.cache)));
        let fetcher = Fetcher::new(api, cache.clone(), config.fetch.clone());

        Ok(Self {
            config,
            cache,
            fetcher,
            format: opts.format,
        })
    }
}
