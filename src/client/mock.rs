//! Mock killmail API client for testing
//!
//! Provides a mock implementation of `KillmailApi` for unit testing without
//! making real API calls.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use super::KillmailApi;
use crate::error::{ApiError, Result};

/// Mock API client for testing.
///
/// Configure expected responses via builder methods, then use in tests.
///
/// # Example
/// ```ignore
/// let mock = MockKillmailClient::new()
///     .with_system_page(30000142, vec![partial_entry(1)])
///     .await
///     .with_esi_killmail(esi_killmail(1, 30000142, Utc::now()))
///     .await;
/// ```
#[derive(Default)]
pub struct MockKillmailClient {
    /// Full killmails keyed by id, served by both get_killmail and get_esi_killmail
    killmails: Arc<Mutex<HashMap<u64, Value>>>,
    /// Kill list pages per system (index 0 is page 1)
    system_pages: Arc<Mutex<HashMap<u64, Vec<Vec<Value>>>>>,
    /// Systems whose list call fails with a transport error
    failing_systems: Arc<Mutex<HashSet<u64>>>,
    /// Queued RedisQ responses; an empty queue yields `{package: null}`
    redisq: Arc<Mutex<VecDeque<Result<Value>>>>,
    /// Artificial latency on ESI fetches
    esi_delay: Arc<Mutex<Option<Duration>>>,
    /// Error to return (if any) - consumed on first use
    error: Arc<Mutex<Option<ApiError>>>,
    /// Track number of calls for verification
    call_count: Arc<Mutex<CallCounts>>,
    /// Ids passed to get_esi_killmail, in call order
    esi_requests: Arc<Mutex<Vec<u64>>>,
}

/// Tracks API call counts for test verification
#[derive(Default, Debug, Clone)]
pub struct CallCounts {
    pub get_killmail: usize,
    pub get_esi_killmail: usize,
    pub list_system_kills: usize,
    pub poll_redisq: usize,
}

impl CallCounts {
    /// Get total number of API calls made.
    pub fn total(&self) -> usize {
        self.get_killmail + self.get_esi_killmail + self.list_system_kills + self.poll_redisq
    }
}

#[allow(dead_code)]
impl MockKillmailClient {
    /// Create a new mock client with default (empty) responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a full killmail body (keyed by its `killmail_id`).
    pub async fn with_esi_killmail(self, body: Value) -> Self {
        let id = body["killmail_id"].as_u64().expect("fixture has killmail_id");
        self.killmails.lock().await.insert(id, body);
        self
    }

    /// Append a page to a system's kill list.
    pub async fn with_system_page(self, system_id: u64, entries: Vec<Value>) -> Self {
        self.system_pages
            .lock()
            .await
            .entry(system_id)
            .or_default()
            .push(entries);
        self
    }

    /// Make list calls for a system fail with a network error.
    pub async fn with_failing_system(self, system_id: u64) -> Self {
        self.failing_systems.lock().await.insert(system_id);
        self
    }

    /// Queue a RedisQ poll response.
    pub async fn with_redisq_response(self, response: Result<Value>) -> Self {
        self.redisq.lock().await.push_back(response);
        self
    }

    /// Delay every ESI fetch.
    pub async fn with_esi_delay(self, delay: Duration) -> Self {
        *self.esi_delay.lock().await = Some(delay);
        self
    }

    /// Configure an error to return on the next API call.
    /// The error is consumed after one use.
    pub async fn with_error(self, error: ApiError) -> Self {
        *self.error.lock().await = Some(error);
        self
    }

    /// Queue a RedisQ response on an already-shared mock.
    pub async fn push_redisq_response(&self, response: Result<Value>) {
        self.redisq.lock().await.push_back(response);
    }

    /// Get the call counts for verification in tests.
    pub async fn call_counts(&self) -> CallCounts {
        self.call_count.lock().await.clone()
    }

    /// Ids requested from ESI, in call order.
    pub async fn esi_requests(&self) -> Vec<u64> {
        self.esi_requests.lock().await.clone()
    }

    async fn check_error(&self) -> Result<()> {
        let mut error = self.error.lock().await;
        if let Some(e) = error.take() {
            return Err(e.into());
        }
        Ok(())
    }

    async fn lookup(&self, killmail_id: u64) -> Result<Value> {
        self.killmails
            .lock()
            .await
            .get(&killmail_id)
            .cloned()
            .ok_or_else(|| {
                ApiError::ClientError {
                    status: 404,
                    message: format!("killmail {} not found", killmail_id),
                }
                .into()
            })
    }
}

#[async_trait]
impl KillmailApi for MockKillmailClient {
    async fn get_killmail(&self, killmail_id: u64) -> Result<Value> {
        self.call_count.lock().await.get_killmail += 1;
        self.check_error().await?;

        let mut body = self.lookup(killmail_id).await?;
        if body.get("zkb").is_none() {
            body["zkb"] = json!({ "hash": format!("hash{}", killmail_id) });
        }
        Ok(body)
    }

    async fn get_esi_killmail(&self, killmail_id: u64, _hash: &str) -> Result<Value> {
        self.call_count.lock().await.get_esi_killmail += 1;
        self.esi_requests.lock().await.push(killmail_id);
        self.check_error().await?;

        let delay = *self.esi_delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut body = self.lookup(killmail_id).await?;
        // ESI never returns zkb metadata
        if let Some(obj) = body.as_object_mut() {
            obj.remove("zkb");
        }
        Ok(body)
    }

    async fn list_system_kills(&self, system_id: u64, page: u32) -> Result<Vec<Value>> {
        self.call_count.lock().await.list_system_kills += 1;
        self.check_error().await?;

        if self.failing_systems.lock().await.contains(&system_id) {
            return Err(ApiError::Network(format!("connection reset for {}", system_id)).into());
        }

        let pages = self.system_pages.lock().await;
        Ok(pages
            .get(&system_id)
            .and_then(|p| p.get(page.saturating_sub(1) as usize))
            .cloned()
            .unwrap_or_default())
    }

    async fn poll_redisq(&self, _queue_id: &str) -> Result<Value> {
        self.call_count.lock().await.poll_redisq += 1;
        self.check_error().await?;

        self.redisq
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(json!({ "package": null })))
    }
}
