//! Response cache middleware for the global feed.
//!
//! Serves GET requests from the page store while an entry is inside its TTL.
//! Only 200 OK responses without `Set-Cookie` are stored; everything else
//! passes through untouched.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body_util::BodyExt;
use tracing::{debug, instrument};

use super::config::CacheConfig;
use super::store::{CachedResponse, PageKey, PageStore};

const MAX_CACHED_BODY_BYTES: usize = 1024 * 1024;

/// Shared cache state for middleware.
#[derive(Clone)]
pub struct CacheState {
    pub config: CacheConfig,
    pub store: Arc<PageStore>,
}

impl CacheState {
    pub fn new(config: CacheConfig) -> Self {
        let store = Arc::new(PageStore::new(&config));
        Self { config, store }
    }
}

/// Middleware caching rendered pages on the routes it wraps.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn page_cache_layer(
    State(cache): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !cache.config.enabled {
        return next.run(request).await;
    }

    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();
    let query = request.uri().query().unwrap_or("");
    let key = PageKey::new(&path, query);

    if let Some(cached) = cache.store.get(&key) {
        metrics::counter!("quaderno_page_cache_hit_total").increment(1);
        debug!(outcome = "hit", "serving cached page");
        return build_response(cached);
    }

    metrics::counter!("quaderno_page_cache_miss_total").increment(1);
    debug!(outcome = "miss", "executing handler");

    let response = next.run(request).await;

    if response.status() != StatusCode::OK
        || response.headers().contains_key(header::SET_COOKIE)
    {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match BodyExt::collect(http_body_util::Limited::new(
        body,
        MAX_CACHED_BODY_BYTES,
    ))
    .await
    {
        Ok(collected) => collected.to_bytes(),
        Err(_) => {
            // Body larger than the cache bound or mid-stream failure.
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let cached = CachedResponse {
        status: parts.status.as_u16(),
        headers: parts
            .headers
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect(),
        body: bytes.clone(),
    };

    cache.store.put(key, cached);
    metrics::counter!("quaderno_page_cache_store_total").increment(1);

    Response::from_parts(parts, Body::from(bytes))
}

/// Build a response from cached data.
fn build_response(cached: CachedResponse) -> Response {
    use axum::http::HeaderValue;

    let mut builder = Response::builder().status(cached.status);

    for (name, value) in cached.headers {
        if let Ok(header_value) = HeaderValue::from_str(&value) {
            builder = builder.header(name, header_value);
        }
    }

    builder
        .body(Body::from(cached.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
