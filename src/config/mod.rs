//! Configuration management for killfeed

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Environment variable that overrides `realtime.queue_secret`
pub const QUEUE_SECRET_ENV: &str = "KILLFEED_QUEUE_SECRET";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Upstream endpoints
    pub api: ApiSettings,

    /// Named rate-limit buckets, keyed by bucket name
    pub rate_limits: BTreeMap<String, BucketSettings>,

    /// Retry policy for upstream calls
    pub retry: RetrySettings,

    /// Cache lifetimes
    pub cache: CacheSettings,

    /// Per-system fetch behavior
    pub fetch: FetchSettings,

    /// Background preloading
    pub preload: PreloadSettings,

    /// RedisQ listener
    pub realtime: RealtimeSettings,

    /// Maps and their visible systems (static map source)
    pub maps: Vec<MapSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub zkb_base_url: String,
    pub esi_base_url: String,
    pub redisq_url: String,
    pub user_agent: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            zkb_base_url: "https://zkillboard.com/api".to_string(),
            esi_base_url: "https://esi.evetech.net/latest".to_string(),
            redisq_url: "https://zkillredisq.stream/listen.php".to_string(),
            user_agent: format!("killfeed/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: 15,
        }
    }
}

/// One named rate-limit bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketSettings {
    /// Requests allowed per window
    pub capacity: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// How long a caller may queue for a permit before getting `RateLimited`
    #[serde(default)]
    pub max_wait_ms: u64,
}

impl BucketSettings {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

/// Buckets used when the config file does not name any.
pub fn default_buckets() -> BTreeMap<String, BucketSettings> {
    let mut buckets = BTreeMap::new();
    buckets.insert(
        "zkb".to_string(),
        BucketSettings {
            capacity: 5,
            window_ms: 1_000,
            max_wait_ms: 2_000,
        },
    );
    buckets.insert(
        "esi".to_string(),
        BucketSettings {
            capacity: 20,
            window_ms: 1_000,
            max_wait_ms: 2_000,
        },
    );
    buckets.insert(
        "redisq".to_string(),
        BucketSettings {
            capacity: 1,
            window_ms: 1_000,
            max_wait_ms: 1_000,
        },
    );
    buckets.insert(
        "default".to_string(),
        BucketSettings {
            capacity: 10,
            window_ms: 1_000,
            max_wait_ms: 0,
        },
    );
    buckets
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Overall deadline for one call including all attempts
    pub max_elapsed_ms: u64,
    /// Fraction of each delay randomized (0.2 = ±20%)
    pub jitter: f64,
    /// Floor applied to waits after a 429 without Retry-After
    pub rate_limited_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 10_000,
            max_elapsed_ms: 30_000,
            jitter: 0.2,
            rate_limited_delay_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub killmail_ttl_secs: u64,
    pub kill_count_ttl_secs: u64,
    pub recent_fetch_ttl_secs: u64,
    /// Fraction of the recency TTL randomized per system
    pub recent_fetch_jitter: f64,
    /// How often expired entries are swept out
    pub purge_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            killmail_ttl_secs: 24 * 60 * 60,
            kill_count_ttl_secs: 60 * 60,
            recent_fetch_ttl_secs: 15 * 60,
            recent_fetch_jitter: 0.1,
            purge_interval_secs: 5 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub max_concurrency: usize,
    pub call_timeout_secs: u64,
    /// Upper bound on list pages walked per system fetch
    pub max_pages: u32,
    /// Upstream lists are newest-first; disabling this turns off early exit
    pub assume_sorted: bool,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            call_timeout_secs: 30,
            max_pages: 1,
            assume_sorted: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadSettings {
    pub enabled: bool,
    /// Maps updated within this many minutes count as active
    pub active_window_mins: i64,
    pub quick_limit: usize,
    pub quick_since_hours: u32,
    pub expanded_limit: usize,
    pub expanded_since_hours: u32,
    pub expanded_fallback_hours: u32,
    pub max_concurrency: usize,
    pub task_timeout_secs: u64,
    /// Interval between automatic preload cycles
    pub refresh_interval_secs: u64,
}

impl Default for PreloadSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            active_window_mins: 30,
            quick_limit: 1,
            quick_since_hours: 1,
            expanded_limit: 25,
            expanded_since_hours: 1,
            expanded_fallback_hours: 24,
            max_concurrency: 2,
            task_timeout_secs: 5 * 60,
            refresh_interval_secs: 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeSettings {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_secret: Option<String>,
    /// Server-side wait passed as `ttw`
    pub time_to_wait_secs: u64,
    pub idle_interval_ms: u64,
    pub fast_interval_ms: u64,
    pub initial_backoff_ms: u64,
    pub backoff_factor: f64,
    pub max_backoff_ms: u64,
    pub follow_up_timeout_secs: u64,
    pub max_follow_ups: usize,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_secret: None,
            time_to_wait_secs: 1,
            idle_interval_ms: 5_000,
            fast_interval_ms: 500,
            initial_backoff_ms: 1_000,
            backoff_factor: 2.0,
            max_backoff_ms: 60_000,
            follow_up_timeout_secs: 15,
            max_follow_ups: 4,
        }
    }
}

/// A map and the systems currently visible on it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapSettings {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub systems: Vec<u64>,
    /// Last activity on the map; maps without one are always active
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::Invalid(
            "Could not determine home directory".to_string(),
        ))?;

        Ok(home.join(".killfeed").join("config.yaml"))
    }

    /// The explicit path when given, otherwise the default one
    pub fn resolve_path(path: Option<&str>) -> Result<PathBuf> {
        match path {
            Some(p) => Ok(PathBuf::from(p)),
            None => Self::default_path(),
        }
    }

    /// Load configuration from the given path, or the default path.
    ///
    /// A missing file is not an error: the pipeline runs on defaults.
    pub fn load_at(path: Option<&str>) -> Result<Self> {
        let mut config = Self::load_from(Self::resolve_path(path)?)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path)?;
        let config: Config = serde_yaml::from_str(&contents).map_err(ConfigError::from)?;

        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents =
            serde_yaml::to_string(self).map_err(|e| ConfigError::SaveError(e.to_string()))?;

        std::fs::write(&path, contents)?;

        // The queue secret lives here
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(&path, perms)?;
        }

        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(secret) = std::env::var(QUEUE_SECRET_ENV)
            && !secret.is_empty()
        {
            self.realtime.queue_secret = Some(secret);
        }
    }

    /// The built-in buckets with any configured ones layered on top.
    pub fn buckets(&self) -> BTreeMap<String, BucketSettings> {
        let mut buckets = default_buckets();
        buckets.extend(
            self.rate_limits
                .iter()
                .map(|(name, bucket)| (name.clone(), bucket.clone())),
        );
        buckets
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        for (name, bucket) in self.buckets() {
            if bucket.capacity == 0 || bucket.window_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "rate limit bucket '{}' needs a non-zero capacity and window",
                    name
                ))
                .into());
            }
        }
        if self.fetch.max_concurrency == 0 || self.preload.max_concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".to_string()).into());
        }
        if !(0.0..1.0).contains(&self.cache.recent_fetch_jitter) {
            return Err(ConfigError::Invalid(
                "cache.recent_fetch_jitter must be in [0, 1)".to_string(),
            )
            .into());
        }
        if self.realtime.backoff_factor < 1.0 {
            return Err(ConfigError::Invalid(
                "realtime.backoff_factor must be >= 1.0".to_string(),
            )
            .into());
        }
        Ok(())
    }

    /// Queue secret for the RedisQ listener
    pub fn require_queue_secret(&self) -> Result<&str> {
        self.realtime
            .queue_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingQueueSecret.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cache.killmail_ttl_secs, 86_400);
        assert_eq!(config.cache.kill_count_ttl_secs, 3_600);
        assert_eq!(config.cache.recent_fetch_ttl_secs, 900);
        assert_eq!(config.fetch.max_concurrency, 8);
        assert_eq!(config.preload.max_concurrency, 2);
        assert_eq!(config.preload.expanded_limit, 25);
        assert!(config.realtime.queue_secret.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(dir.path().join("nope.yaml")).unwrap();
        assert_eq!(config.fetch.max_pages, 1);
        assert!(config.maps.is_empty());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "fetch:\n  max_concurrency: 3\nmaps:\n  - id: home\n    systems: [30000142, 30002187]\n",
        )
        .unwrap();

        let config = Config::load_from(path).unwrap();
        assert_eq!(config.fetch.max_concurrency, 3);
        assert_eq!(config.fetch.call_timeout_secs, 30);
        assert_eq!(config.maps.len(), 1);
        assert_eq!(config.maps[0].systems, vec![30000142, 30002187]);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = Config::default();
        config.realtime.queue_secret = Some("s3cret".to_string());
        config.save_to(path.clone()).unwrap();

        let loaded = Config::load_from(path).unwrap();
        assert_eq!(loaded.realtime.queue_secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_buckets_fall_back_to_defaults() {
        let config = Config::default();
        let buckets = config.buckets();
        assert!(buckets.contains_key("zkb"));
        assert!(buckets.contains_key("esi"));
        assert!(buckets.contains_key("redisq"));
        assert!(buckets.contains_key("default"));
    }

    #[test]
    fn test_partial_rate_limits_keep_other_buckets() {
        let yaml = "rate_limits:\n  zkb:\n    capacity: 2\n    window_ms: 5000\n    max_wait_ms: 0\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let buckets = config.buckets();

        assert_eq!(buckets["zkb"].capacity, 2);
        assert_eq!(buckets["zkb"].window_ms, 5000);
        assert_eq!(buckets["esi"].capacity, 20);
        assert_eq!(buckets["redisq"].capacity, 1);
        assert!(buckets.contains_key("default"));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = Config::default();
        config.rate_limits.insert(
            "zkb".to_string(),
            BucketSettings {
                capacity: 0,
                window_ms: 1000,
                max_wait_ms: 0,
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_jitter() {
        let mut config = Config::default();
        config.cache.recent_fetch_jitter = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_require_queue_secret() {
        let mut config = Config::default();
        assert!(config.require_queue_secret().is_err());

        config.realtime.queue_secret = Some(String::new());
        assert!(config.require_queue_secret().is_err());

        config.realtime.queue_secret = Some("abc".to_string());
        assert_eq!(config.require_queue_secret().unwrap(), "abc");
    }
}
