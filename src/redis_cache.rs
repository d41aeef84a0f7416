//! Distributed L2 cache tier backed by Redis.
//!
//! Everything here fails soft: a connection loss, command error, or timeout
//! resolves the call as absent/no-op, flips the connection-state machine to
//! `Degraded`, and lets a later call retry once the backoff elapses. The
//! request path never blocks on reconnection.

use crate::config::CacheConfig;
use crate::error::CacheError;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// L2 connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection attempt made yet.
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// Healthy.
    Connected,
    /// Recent failure; calls short-circuit until the backoff elapses.
    Degraded,
}

struct ConnState {
    connection: Option<ConnectionManager>,
    state: ConnectionState,
    retry_at: Option<Instant>,
    backoff: Duration,
    /// Set after the first warn of a failure burst so later failures in
    /// the same burst only log at debug.
    burst_logged: bool,
}

/// Redis-backed distributed cache tier.
#[derive(Clone)]
pub struct RedisCache {
    config: CacheConfig,
    state: Arc<Mutex<ConnState>>,
}

impl RedisCache {
    /// Create a lazily-connecting client. No network traffic happens until
    /// the first operation.
    pub fn new(config: CacheConfig) -> Self {
        let backoff = config.min_backoff;
        Self {
            config,
            state: Arc::new(Mutex::new(ConnState {
                connection: None,
                state: ConnectionState::Disconnected,
                retry_at: None,
                backoff,
                burst_logged: false,
            })),
        }
    }

    /// Current state of the connection machine.
    pub async fn state(&self) -> ConnectionState {
        self.state.lock().await.state
    }

    /// Get a value. Absent on miss, connection failure, or timeout.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let key = self.config.build_key(key);
        let mut conn = self.connection().await?;
        match self
            .bounded(async move { conn.get::<_, Option<Vec<u8>>>(&key).await })
            .await
        {
            Ok(value) => value,
            Err(reason) => {
                self.mark_degraded(&reason).await;
                None
            }
        }
    }

    /// Set a value with a TTL. No-op on failure.
    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let key = self.config.build_key(key);
        let ttl_seconds = ttl.as_secs().max(1);
        let Some(mut conn) = self.connection().await else {
            return;
        };
        if let Err(reason) = self
            .bounded(async move { conn.set_ex::<_, _, ()>(&key, value, ttl_seconds).await })
            .await
        {
            self.mark_degraded(&reason).await;
        }
    }

    /// Delete a key. Returns whether the remote store removed an entry;
    /// false on failure.
    pub async fn delete(&self, key: &str) -> bool {
        let key = self.config.build_key(key);
        let Some(mut conn) = self.connection().await else {
            return false;
        };
        match self
            .bounded(async move { conn.del::<_, u64>(&key).await })
            .await
        {
            Ok(removed) => removed > 0,
            Err(reason) => {
                self.mark_degraded(&reason).await;
                false
            }
        }
    }

    /// Remaining TTL of a key.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let key = self.config.build_key(key);
        let mut conn = self.connection().await?;
        match self
            .bounded(async move { conn.ttl::<_, i64>(&key).await })
            .await
        {
            // -2: no such key, -1: no expiry
            Ok(seconds) if seconds > 0 => Some(Duration::from_secs(seconds as u64)),
            Ok(_) => None,
            Err(reason) => {
                self.mark_degraded(&reason).await;
                None
            }
        }
    }

    /// Delete every key matching a glob pattern via incremental `SCAN`,
    /// never a blocking full-keyspace command. Returns the number deleted.
    pub async fn delete_by_pattern(&self, pattern: &str) -> u64 {
        let pattern = self.config.build_key(pattern);
        let Some(mut conn) = self.connection().await else {
            return 0;
        };

        let mut deleted = 0u64;
        let mut cursor = 0u64;
        loop {
            let scan = {
                let pattern = pattern.clone();
                let conn = &mut conn;
                self.bounded(async move {
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(100)
                        .query_async::<(u64, Vec<String>)>(conn)
                        .await
                })
                .await
            };

            let (next, batch) = match scan {
                Ok(reply) => reply,
                Err(reason) => {
                    self.mark_degraded(&reason).await;
                    return deleted;
                }
            };

            if !batch.is_empty() {
                let removed = {
                    let conn = &mut conn;
                    self.bounded(async move { conn.del::<_, u64>(&batch).await })
                        .await
                };
                match removed {
                    Ok(count) => deleted += count,
                    Err(reason) => {
                        self.mark_degraded(&reason).await;
                        return deleted;
                    }
                }
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        debug!(pattern = %pattern, deleted, "pattern delete completed");
        deleted
    }

    /// Liveness probe.
    pub async fn ping(&self) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };
        match self
            .bounded(async move {
                redis::cmd("PING").query_async::<String>(&mut conn).await
            })
            .await
        {
            Ok(_) => true,
            Err(reason) => {
                self.mark_degraded(&reason).await;
                false
            }
        }
    }

    /// Run a command under the per-operation ceiling.
    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, redis::RedisError>>,
    ) -> Result<T, CacheError> {
        match tokio::time::timeout(self.config.operation_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CacheError::Redis(e)),
            Err(_) => Err(CacheError::Timeout),
        }
    }

    /// Hand out a connection, establishing one if the state machine allows.
    ///
    /// Returns `None` while degraded and inside the backoff window, or when
    /// the connect attempt itself fails; the caller reports absent.
    async fn connection(&self) -> Option<ConnectionManager> {
        let url = self.config.redis_url.as_ref()?;

        let mut state = self.state.lock().await;
        if let (ConnectionState::Connected, Some(conn)) = (state.state, state.connection.as_ref())
        {
            return Some(conn.clone());
        }

        if state.state == ConnectionState::Degraded {
            if let Some(retry_at) = state.retry_at {
                if Instant::now() < retry_at {
                    return None;
                }
            }
        }

        state.state = ConnectionState::Connecting;
        let attempt = async {
            let client = redis::Client::open(url.as_str())?;
            ConnectionManager::new(client).await
        };

        match tokio::time::timeout(self.config.connection_timeout, attempt).await {
            Ok(Ok(conn)) => {
                info!("connected to cache backend");
                state.connection = Some(conn.clone());
                state.state = ConnectionState::Connected;
                state.retry_at = None;
                state.backoff = self.config.min_backoff;
                state.burst_logged = false;
                Some(conn)
            }
            Ok(Err(e)) => {
                let error = CacheError::Unavailable(e.to_string());
                Self::enter_degraded(&mut state, &error, self.config.max_backoff);
                None
            }
            Err(_) => {
                Self::enter_degraded(&mut state, &CacheError::Timeout, self.config.max_backoff);
                None
            }
        }
    }

    /// Record a call failure: drop the connection and back off.
    async fn mark_degraded(&self, error: &CacheError) {
        let mut state = self.state.lock().await;
        state.connection = None;
        Self::enter_degraded(&mut state, error, self.config.max_backoff);
    }

    fn enter_degraded(state: &mut ConnState, error: &CacheError, max_backoff: Duration) {
        state.state = ConnectionState::Degraded;
        state.retry_at = Some(Instant::now() + state.backoff);
        state.backoff = (state.backoff * 2).min(max_backoff);

        if state.burst_logged {
            debug!(error = %error, "cache backend still unavailable");
        } else {
            warn!(error = %error, "cache backend unavailable, continuing without L2");
            state.burst_logged = true;
        }
    }
}
