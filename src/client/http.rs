//! Rate-limited HTTP client shared by all upstream calls

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use reqwest::{Client as HttpClient, Method, StatusCode};
use serde_json::Value;

use super::rate_limit::RateLimiterSet;
use super::retry::{RetryPolicy, retry_with_backoff};
use crate::config::ApiSettings;
use crate::error::{ApiError, Result};

/// Performs outbound requests against named rate-limit buckets.
///
/// Every request takes a permit from its bucket before hitting the network, so
/// concurrent callers share the same limit.
#[derive(Clone)]
pub struct RateLimitedClient {
    http: HttpClient,
    limiters: Arc<RateLimiterSet>,
    retry: RetryPolicy,
}

impl RateLimitedClient {
    pub fn new(api: &ApiSettings, limiters: Arc<RateLimiterSet>, retry: RetryPolicy) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(api.request_timeout_secs))
            .user_agent(api.user_agent.clone())
            .build()
            .map_err(ApiError::from)?;

        Ok(Self {
            http,
            limiters,
            retry,
        })
    }

    /// One attempt: take a permit, send, classify the status, decode JSON.
    pub async fn request(&self, bucket: &str, method: Method, url: &str) -> Result<Value> {
        self.limiters.acquire(bucket).await?;

        debug!("{} {} [{}]", method, url, bucket);
        let response = self
            .http
            .request(method, url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(ApiError::from)?;

        let status = response.status();
        match status {
            s if s.is_success() => {
                let data = response.json::<Value>().await.map_err(|e| {
                    ApiError::InvalidResponse(format!("Failed to parse response: {}", e))
                })?;
                Ok(data)
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);
                Err(ApiError::RateLimited(retry_after).into())
            }
            s if s.is_client_error() => {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Request rejected".to_string());
                Err(ApiError::ClientError {
                    status: s.as_u16(),
                    message,
                }
                .into())
            }
            s if s.is_server_error() => {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| format!("Server error: {}", s));
                Err(ApiError::ServerError(format!("HTTP {}: {}", s.as_u16(), message)).into())
            }
            _ => Err(ApiError::InvalidResponse(format!("Unexpected status code: {}", status)).into()),
        }
    }

    /// GET with the retry policy applied.
    pub async fn get_json(&self, bucket: &str, url: &str) -> Result<Value> {
        retry_with_backoff(&self.retry, url, || self.request(bucket, Method::GET, url)).await
    }
}
