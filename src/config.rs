//! Cache configuration types.

use std::time::Duration;

/// TTL presets used across the platform.
///
/// Services pick a band rather than inventing per-call numbers, so related
/// views expire together.
pub mod ttl {
    use std::time::Duration;

    /// Volatile data: listings, search results.
    pub const SHORT: Duration = Duration::from_secs(60);
    /// Entity detail views.
    pub const MEDIUM: Duration = Duration::from_secs(300);
    /// Slow-moving aggregates.
    pub const LONG: Duration = Duration::from_secs(3600);
    /// System-level settings.
    pub const DAY: Duration = Duration::from_secs(86_400);
}

/// Configuration for the multi-layer cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Redis connection URL. `None` means run in L1-only mode.
    pub redis_url: Option<String>,

    /// Key prefix applied to every L2 key.
    pub key_prefix: Option<String>,

    /// Default TTL when a remaining TTL cannot be determined.
    pub default_ttl: Duration,

    /// Maximum number of L1 entries.
    pub l1_max_entries: usize,

    /// Aggregate L1 value-byte budget.
    pub l1_max_bytes: usize,

    /// Payloads larger than this many encoded bytes are compressed.
    pub compression_threshold: usize,

    /// Ceiling on establishing an L2 connection.
    pub connection_timeout: Duration,

    /// Ceiling on any single L2 command. A call that exceeds it resolves
    /// as a miss/no-op within the same call.
    pub operation_timeout: Duration,

    /// Ceiling on a caller-supplied loader; guards the in-flight map
    /// against loaders that never settle.
    pub loader_timeout: Duration,

    /// Initial reconnect backoff after an L2 failure.
    pub min_backoff: Duration,

    /// Upper bound on the reconnect backoff.
    pub max_backoff: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: None,
            default_ttl: Duration::from_secs(300),
            l1_max_entries: 1000,
            l1_max_bytes: 8 * 1024 * 1024,
            compression_threshold: 1024,
            connection_timeout: Duration::from_millis(500),
            operation_timeout: Duration::from_millis(250),
            loader_timeout: Duration::from_secs(30),
            min_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl CacheConfig {
    /// Create a configuration with defaults and no L2 tier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration pointing at a Redis URL.
    ///
    /// # Examples
    ///
    /// ```
    /// use harvest_cache::CacheConfig;
    ///
    /// let config = CacheConfig::redis("redis://localhost:6379");
    /// assert!(config.redis_url.is_some());
    /// ```
    pub fn redis(url: impl Into<String>) -> Self {
        Self {
            redis_url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Load configuration from environment variables.
    ///
    /// `REDIS_URL` takes precedence; otherwise a URL is assembled from
    /// `REDIS_HOST`, `REDIS_PORT`, `REDIS_PASSWORD` and `REDIS_TLS`.
    /// With none of these set the cache runs in L1-only mode.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("REDIS_URL") {
            config.redis_url = Some(url);
        } else if let Ok(host) = std::env::var("REDIS_HOST") {
            let port = std::env::var("REDIS_PORT")
                .ok()
                .and_then(|p| p.parse::<u16>().ok())
                .unwrap_or(6379);
            let scheme = match std::env::var("REDIS_TLS").ok().as_deref() {
                Some("1") | Some("true") => "rediss",
                _ => "redis",
            };
            let url = match std::env::var("REDIS_PASSWORD") {
                Ok(password) => format!("{}://:{}@{}:{}", scheme, password, host, port),
                Err(_) => format!("{}://{}:{}", scheme, host, port),
            };
            config.redis_url = Some(url);
        }

        if let Ok(prefix) = std::env::var("CACHE_PREFIX") {
            config.key_prefix = Some(prefix);
        }

        if let Ok(secs) = std::env::var("CACHE_DEFAULT_TTL_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                config.default_ttl = Duration::from_secs(secs);
            }
        }

        if let Ok(bytes) = std::env::var("CACHE_COMPRESSION_THRESHOLD") {
            if let Ok(bytes) = bytes.parse::<usize>() {
                config.compression_threshold = bytes;
            }
        }

        config
    }

    /// Set the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Set the default TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the L1 entry capacity.
    pub fn with_l1_max_entries(mut self, max: usize) -> Self {
        self.l1_max_entries = max;
        self
    }

    /// Set the L1 byte budget.
    pub fn with_l1_max_bytes(mut self, max: usize) -> Self {
        self.l1_max_bytes = max;
        self
    }

    /// Set the compression threshold in bytes.
    pub fn with_compression_threshold(mut self, threshold: usize) -> Self {
        self.compression_threshold = threshold;
        self
    }

    /// Set the connection timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the per-command timeout.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the loader timeout.
    pub fn with_loader_timeout(mut self, timeout: Duration) -> Self {
        self.loader_timeout = timeout;
        self
    }

    /// Build the final key with prefix if configured.
    pub fn build_key(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{}:{}", prefix, key),
            None => key.to_string(),
        }
    }
}
