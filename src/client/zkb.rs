//! zKillboard / ESI / RedisQ client

use async_trait::async_trait;
use serde_json::Value;

use super::KillmailApi;
use super::http::RateLimitedClient;
use crate::config::ApiSettings;
use crate::error::{ApiError, Result};

pub const ZKB_BUCKET: &str = "zkb";
pub const ESI_BUCKET: &str = "esi";
pub const REDISQ_BUCKET: &str = "redisq";

/// Client for the three killmail upstreams.
pub struct ZkbClient {
    http: RateLimitedClient,
    zkb_base_url: String,
    esi_base_url: String,
    redisq_url: String,
    time_to_wait_secs: u64,
}

impl ZkbClient {
    pub fn new(http: RateLimitedClient, api: &ApiSettings, time_to_wait_secs: u64) -> Self {
        Self {
            http,
            zkb_base_url: api.zkb_base_url.trim_end_matches('/').to_string(),
            esi_base_url: api.esi_base_url.trim_end_matches('/').to_string(),
            redisq_url: api.redisq_url.clone(),
            time_to_wait_secs,
        }
    }
}

#[async_trait]
impl KillmailApi for ZkbClient {
    async fn get_killmail(&self, killmail_id: u64) -> Result<Value> {
        let url = format!("{}/killID/{}/", self.zkb_base_url, killmail_id);
        let lookup = self.http.get_json(ZKB_BUCKET, &url).await?;

        // zKillboard answers with a one-element list of {killmail_id, zkb}
        let zkb = lookup
            .as_array()
            .and_then(|entries| entries.first())
            .and_then(|entry| entry.get("zkb"))
            .cloned()
            .ok_or_else(|| ApiError::ClientError {
                status: 404,
                message: format!("Killmail {} not found on zKillboard", killmail_id),
            })?;

        let hash = zkb
            .get("hash")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::InvalidResponse("zkb entry without hash".to_string()))?
            .to_string();

        let mut killmail = self.get_esi_killmail(killmail_id, &hash).await?;
        if let Some(obj) = killmail.as_object_mut() {
            obj.insert("zkb".to_string(), zkb);
        }
        Ok(killmail)
    }

    async fn get_esi_killmail(&self, killmail_id: u64, hash: &str) -> Result<Value> {
        let url = format!("{}/killmails/{}/{}/", self.esi_base_url, killmail_id, hash);
        self.http.get_json(ESI_BUCKET, &url).await
    }

    async fn list_system_kills(&self, system_id: u64, page: u32) -> Result<Vec<Value>> {
        let url = format!(
            "{}/systemID/{}/page/{}/",
            self.zkb_base_url, system_id, page
        );
        match self.http.get_json(ZKB_BUCKET, &url).await? {
            Value::Array(entries) => Ok(entries),
            other => Err(ApiError::InvalidResponse(format!(
                "Expected a kill list for system {}, got {}",
                system_id,
                kind_of(&other)
            ))
            .into()),
        }
    }

    async fn poll_redisq(&self, queue_id: &str) -> Result<Value> {
        let url = format!(
            "{}?queueID={}&ttw={}",
            self.redisq_url, queue_id, self.time_to_wait_secs
        );
        // The poll loop owns its own backoff, so only one attempt here
        self.http
            .request(REDISQ_BUCKET, reqwest::Method::GET, &url)
            .await
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
