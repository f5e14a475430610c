mod support;

use std::time::Duration;

use axum::http::StatusCode;
use quaderno::application::repos::PostsRepo;
use quaderno::cache::CacheConfig;
use support::{body_string, build_app_with_cache, seed_group, seed_post, seed_user};

fn cache_config(ttl_seconds: u64) -> CacheConfig {
    CacheConfig {
        enabled: true,
        ttl_seconds,
        capacity: 8,
    }
}

#[tokio::test]
async fn global_feed_serves_stale_pages_within_the_ttl() {
    let app = build_app_with_cache(Some(cache_config(20)));
    let author = seed_user(&app.store, "elena").await;
    let post = seed_post(&app.store, &author, None, "cached entry").await;

    let first = body_string(app.get("/").await).await;
    assert!(first.contains("cached entry"));

    // A write after the page was cached is not reflected until expiry.
    app.store.delete_post(post.id).await.unwrap();
    let second = body_string(app.get("/").await).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn cached_pages_are_keyed_by_query_string() {
    let app = build_app_with_cache(Some(cache_config(20)));
    let author = seed_user(&app.store, "elena").await;
    for n in 0..14 {
        seed_post(&app.store, &author, None, &format!("entry {n}")).await;
    }

    let page_one = body_string(app.get("/").await).await;
    let page_two = body_string(app.get("/?page=2").await).await;
    assert_ne!(page_one, page_two);
    assert!(page_two.contains("Page 2 of 2"));
}

#[tokio::test]
async fn expired_entries_are_rendered_fresh() {
    let app = build_app_with_cache(Some(cache_config(1)));
    let author = seed_user(&app.store, "elena").await;
    let post = seed_post(&app.store, &author, None, "short-lived entry").await;

    let first = body_string(app.get("/").await).await;
    assert!(first.contains("short-lived entry"));

    app.store.delete_post(post.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let fresh = body_string(app.get("/").await).await;
    assert!(!fresh.contains("short-lived entry"));
    assert!(fresh.contains("No posts yet."));
}

#[tokio::test]
async fn group_feeds_are_never_cached() {
    let app = build_app_with_cache(Some(cache_config(20)));
    let author = seed_user(&app.store, "elena").await;
    let hiking = seed_group(&app.store, "Hiking", "hiking").await;
    let post = seed_post(&app.store, &author, Some(&hiking), "trail report").await;

    let before = body_string(app.get("/group/hiking/").await).await;
    assert!(before.contains("trail report"));

    app.store.delete_post(post.id).await.unwrap();
    let after = body_string(app.get("/group/hiking/").await).await;
    assert!(!after.contains("trail report"));
}

#[tokio::test]
async fn disabled_cache_always_renders_fresh() {
    let app = build_app_with_cache(None);
    let author = seed_user(&app.store, "elena").await;
    let post = seed_post(&app.store, &author, None, "uncached entry").await;

    assert!(body_string(app.get("/").await).await.contains("uncached entry"));
    app.store.delete_post(post.id).await.unwrap();
    let after = body_string(app.get("/").await).await;
    assert!(!after.contains("uncached entry"));
}

#[tokio::test]
async fn not_found_pages_are_not_cached() {
    let app = build_app_with_cache(Some(cache_config(20)));
    let author = seed_user(&app.store, "elena").await;
    for n in 0..11 {
        seed_post(&app.store, &author, None, &format!("entry {n}")).await;
    }

    // Page 3 does not exist yet; the 404 must not stick around once it does.
    assert_eq!(app.get("/?page=3").await.status(), StatusCode::NOT_FOUND);
    for n in 11..21 {
        seed_post(&app.store, &author, None, &format!("entry {n}")).await;
    }
    assert_eq!(app.get("/?page=3").await.status(), StatusCode::OK);
}
