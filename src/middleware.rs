//! Cache-aware HTTP layer.
//!
//! Framework-neutral request/response value types plus [`HttpCacheLayer`],
//! which serves `GET` responses out of the tiered cache. Hits carry `Age`,
//! `ETag`, and `X-Cache: HIT` headers and honor `If-None-Match` with a
//! `304 Not Modified`; misses run the wrapped handler and store the result
//! when it is cacheable.

use crate::config::ttl;
use crate::keys;
use crate::tiered::MultiLayerCache;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// A request, reduced to the fields the cache layer needs.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn set_header(&mut self, name: &str, value: String) {
        if let Some(slot) = self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            slot.1 = value;
        } else {
            self.headers.push((name.to_string(), value));
        }
    }
}

/// Parsed `Cache-Control` directives, reduced to what the layer acts on.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheControl {
    pub no_store: bool,
    pub no_cache: bool,
    pub max_age: Option<u64>,
}

impl CacheControl {
    pub fn parse(header: &str) -> Self {
        let mut parsed = Self::default();
        for directive in header.split(',') {
            let directive = directive.trim().to_ascii_lowercase();
            match directive.as_str() {
                "no-store" => parsed.no_store = true,
                "no-cache" => parsed.no_cache = true,
                _ => {
                    if let Some(secs) = directive.strip_prefix("max-age=") {
                        parsed.max_age = secs.parse().ok();
                    }
                }
            }
        }
        parsed
    }
}

/// Strong ETag from a response body, formatted as a quoted hex digest.
pub fn etag_for(body: &str) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("\"{:x}\"", hasher.finish())
}

/// The payload stored in the tiered cache for one response.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
    etag: String,
    stored_at: u64,
}

/// Serves idempotent responses from the cache, falling through to the
/// wrapped handler on a miss.
///
/// # Examples
///
/// ```no_run
/// use harvest_cache::{CacheConfig, MultiLayerCache};
/// use harvest_cache::middleware::{HttpCacheLayer, HttpRequest, HttpResponse};
///
/// # async fn example() {
/// let cache = MultiLayerCache::new(CacheConfig::from_env());
/// let layer = HttpCacheLayer::new(cache);
///
/// let request = HttpRequest::get("/api/farms").with_query("page", "1");
/// let response = layer
///     .handle(&request, || async { HttpResponse::ok("[]") })
///     .await;
/// assert_eq!(response.header("X-Cache"), Some("MISS"));
/// # }
/// ```
#[derive(Clone)]
pub struct HttpCacheLayer {
    cache: MultiLayerCache,
    default_ttl: Duration,
}

impl HttpCacheLayer {
    pub fn new(cache: MultiLayerCache) -> Self {
        Self {
            cache,
            default_ttl: ttl::MEDIUM,
        }
    }

    /// TTL used when the response carries no `max-age` of its own.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Serve the request, consulting the cache for `GET`s.
    pub async fn handle<F, Fut>(&self, request: &HttpRequest, handler: F) -> HttpResponse
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = HttpResponse>,
    {
        if request.method.to_uppercase() != "GET" {
            return handler().await;
        }

        let request_cc = request
            .header("Cache-Control")
            .map(CacheControl::parse)
            .unwrap_or_default();
        let key = keys::http::response(&request.method, &request.path, &request.query);

        if !request_cc.no_cache && !request_cc.no_store {
            if let Some(stored) = self.cache.get::<StoredResponse>(&key).await {
                return self.serve_hit(request, stored);
            }
        }

        let mut response = handler().await;
        if self.is_storable(&request_cc, &response) {
            let etag = etag_for(&response.body);
            let stored = StoredResponse {
                status: response.status,
                headers: response.headers.clone(),
                body: response.body.clone(),
                etag: etag.clone(),
                stored_at: unix_now(),
            };
            let ttl = response
                .header("Cache-Control")
                .map(CacheControl::parse)
                .and_then(|cc| cc.max_age)
                .map(Duration::from_secs)
                .unwrap_or(self.default_ttl);
            if let Err(e) = self.cache.set(&key, &stored, ttl).await {
                debug!(key, error = %e, "response not stored");
            }
            response.set_header("ETag", etag);
        }
        response.set_header("X-Cache", "MISS".to_string());
        response
    }

    fn serve_hit(&self, request: &HttpRequest, stored: StoredResponse) -> HttpResponse {
        let age = unix_now().saturating_sub(stored.stored_at);

        if let Some(if_none_match) = request.header("If-None-Match") {
            if etag_matches(if_none_match, &stored.etag) {
                let mut not_modified = HttpResponse {
                    status: 304,
                    headers: Vec::new(),
                    body: String::new(),
                };
                not_modified.set_header("ETag", stored.etag);
                not_modified.set_header("Age", age.to_string());
                not_modified.set_header("X-Cache", "HIT".to_string());
                return not_modified;
            }
        }

        let mut response = HttpResponse {
            status: stored.status,
            headers: stored.headers,
            body: stored.body,
        };
        response.set_header("ETag", stored.etag);
        response.set_header("Age", age.to_string());
        response.set_header("X-Cache", "HIT".to_string());
        response
    }

    fn is_storable(&self, request_cc: &CacheControl, response: &HttpResponse) -> bool {
        if request_cc.no_store || response.status != 200 {
            return false;
        }
        let response_cc = response
            .header("Cache-Control")
            .map(CacheControl::parse)
            .unwrap_or_default();
        !response_cc.no_store
    }
}

fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    if_none_match == "*" || if_none_match.split(',').any(|candidate| candidate.trim() == etag)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
