//! Read-through response caching for axum routes
//!
//! Wrap read-only routes with [`cache_response`]. A `GET` request first looks
//! up `<namespace>:<path-and-query>`; on a hit the stored body is returned
//! without running the handler. On a miss the handler runs and, if it
//! produced a successful JSON object, the body is stored in the background
//! with the route's TTL. Any cache problem falls through to the handler's
//! own output.
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, middleware, routing::get};
//! use savings_cache::middleware::{ResponseCache, cache_response};
//!
//! let customers = ResponseCache::new(cache.clone(), Duration::from_secs(180));
//!
//! let app = Router::new()
//!     .route("/api/customer/list", get(list_customers))
//!     .layer(middleware::from_fn_with_state(customers, cache_response));
//! ```

use std::time::Duration;

use axum::{
    body::{Body, HttpBody},
    extract::{OriginalUri, Request, State},
    http::{HeaderValue, Method, Uri, header},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use crate::CacheOrchestrator;

/// Response header reporting how the cache treated the request.
pub const CACHE_STATUS_HEADER: &str = "x-cache";

/// Query flag that skips the cache for one request.
pub const BYPASS_PARAM: &str = "nocache";

/// Largest response body buffered for caching (1MB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Per-route cache settings.
#[derive(Clone)]
pub struct ResponseCache {
    cache: CacheOrchestrator,
    namespace: String,
    ttl: Duration,
    max_body_bytes: usize,
}

impl ResponseCache {
    pub fn new(cache: CacheOrchestrator, ttl: Duration) -> Self {
        let namespace = cache.connection().config().namespace.clone();
        Self {
            cache,
            namespace,
            ttl,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// `<namespace>:<path-and-query>`
    pub fn cache_key(&self, uri: &Uri) -> String {
        let path_and_query = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| uri.path());
        format!("{}:{}", self.namespace, path_and_query)
    }
}

/// Axum middleware implementing the read-through cache.
pub async fn cache_response(
    State(state): State<ResponseCache>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let uri = request
        .extensions()
        .get::<OriginalUri>()
        .map(|original| original.0.clone())
        .unwrap_or_else(|| request.uri().clone());

    if bypass_requested(&uri) {
        debug!("Cache bypass requested for {}", uri);
        return with_cache_status(next.run(request).await, "BYPASS");
    }

    let key = state.cache_key(&uri);

    if let Some(body) = state.cache.get(&key).await {
        debug!("Serving cached response for key: {}", key);
        return cached_response(body);
    }

    let response = next.run(request).await;
    if !response.status().is_success() {
        return with_cache_status(response, "MISS");
    }

    let within_limit = response
        .body()
        .size_hint()
        .upper()
        .is_some_and(|n| n <= state.max_body_bytes as u64);
    if !within_limit {
        debug!("Response for {} too large or unsized; not cached", key);
        return with_cache_status(response, "MISS");
    }

    // The hint is only advisory; buffer everything so an under-reported body
    // still reaches the client intact.
    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, key = %key, "Failed to read handler response body; not cached");
            parts.headers.remove(header::CONTENT_LENGTH);
            parts
                .headers
                .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("MISS"));
            return Response::from_parts(parts, Body::empty());
        }
    };

    if bytes.len() > state.max_body_bytes {
        debug!("Response for {} exceeded its size hint; not cached", key);
    } else if is_cacheable_payload(&bytes) {
        let cache = state.cache.clone();
        let ttl = state.ttl;
        let value = bytes.to_vec();
        tokio::spawn(async move {
            if cache.set(&key, value, ttl).await {
                debug!("Cached response for key: {} (ttl {:?})", key, ttl);
            } else {
                debug!("Response for key {} was not cached", key);
            }
        });
    }

    parts
        .headers
        .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("MISS"));
    Response::from_parts(parts, Body::from(bytes))
}

fn bypass_requested(uri: &Uri) -> bool {
    uri.query().is_some_and(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .any(|(name, value)| name == BYPASS_PARAM && value.eq_ignore_ascii_case("true"))
    })
}

/// A JSON object that does not flag itself as an error.
fn is_cacheable_payload(body: &[u8]) -> bool {
    let Ok(serde_json::Value::Object(map)) = serde_json::from_slice::<serde_json::Value>(body)
    else {
        return false;
    };

    let failed = map.get("success") == Some(&serde_json::Value::Bool(false));
    let errored = map
        .get("error")
        .is_some_and(|e| !matches!(e, serde_json::Value::Null | serde_json::Value::Bool(false)));
    !failed && !errored
}

fn cached_response(body: Vec<u8>) -> Response {
    let mut response = Response::new(Body::from(body));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(CACHE_STATUS_HEADER, HeaderValue::from_static("HIT"));
    response
}

fn with_cache_status(mut response: Response, status: &'static str) -> Response {
    response
        .headers_mut()
        .insert(CACHE_STATUS_HEADER, HeaderValue::from_static(status));
    response
}
