//! Rendered-page cache for the global feed.
//!
//! The feed at `/` is served from an in-memory store for a fixed TTL after it
//! is rendered. Entries are never invalidated by writes; they simply age out.
//!
//! ```toml
//! [cache]
//! enabled = true
//! ttl_seconds = 20
//! capacity = 64
//! ```

mod config;
mod middleware;
mod store;

pub use config::CacheConfig;
pub use middleware::{CacheState, page_cache_layer};
pub use store::{CachedResponse, PageKey, PageStore, hash_query};
