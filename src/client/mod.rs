//! Upstream killmail APIs: zKillboard, ESI and RedisQ

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

#[cfg(test)]
pub mod fixtures;
pub mod http;
#[cfg(test)]
pub mod mock;
pub mod models;
pub mod parallel;
pub mod rate_limit;
pub mod retry;
pub mod zkb;

pub use http::RateLimitedClient;
#[cfg(test)]
pub use mock::MockKillmailClient;
pub use models::{KillListEntry, Killmail, RedisqPackage, ZkbMeta};
pub use parallel::fetch_bounded;
pub use rate_limit::RateLimiterSet;
pub use retry::RetryPolicy;
pub use zkb::ZkbClient;

/// Killmail upstream operations.
///
/// Methods return raw JSON; parsing happens in the pipeline so that a single
/// malformed record can be skipped without failing its batch.
#[async_trait]
pub trait KillmailApi: Send + Sync {
    /// Full killmail by id, with its zkb metadata embedded under `zkb`.
    async fn get_killmail(&self, killmail_id: u64) -> Result<Value>;

    /// Full killmail body from ESI by id and hash.
    async fn get_esi_killmail(&self, killmail_id: u64, hash: &str) -> Result<Value>;

    /// One page of a system's kill list, newest first. Pages start at 1.
    async fn list_system_kills(&self, system_id: u64, page: u32) -> Result<Vec<Value>>;

    /// Poll the RedisQ queue once.
    async fn poll_redisq(&self, queue_id: &str) -> Result<Value>;
}
