mod support;

use axum::http::StatusCode;
use support::{body_string, build_app, seed_group, seed_post, seed_user};

#[tokio::test]
async fn empty_global_feed_renders_placeholder() {
    let app = build_app();
    let response = app.get("/").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("No posts yet."));
}

#[tokio::test]
async fn global_feed_lists_newest_first() {
    let app = build_app();
    let author = seed_user(&app.store, "elena").await;
    let first = seed_post(&app.store, &author, None, "first entry").await;
    let second = seed_post(&app.store, &author, None, "second entry").await;

    let body = body_string(app.get("/").await).await;
    let pos_first = body
        .find(&format!("data-post-id=\"{}\"", first.id))
        .expect("first post rendered");
    let pos_second = body
        .find(&format!("data-post-id=\"{}\"", second.id))
        .expect("second post rendered");
    assert!(pos_second < pos_first, "newer post must come first");
}

#[tokio::test]
async fn global_feed_paginates_at_the_configured_size() {
    // The test router uses a page size of 10.
    let app = build_app();
    let author = seed_user(&app.store, "elena").await;
    for n in 0..14 {
        seed_post(&app.store, &author, None, &format!("entry {n}")).await;
    }

    let page_one = body_string(app.get("/").await).await;
    assert_eq!(page_one.matches("data-post-id=").count(), 10);
    assert!(page_one.contains("Page 1 of 2"));
    assert!(page_one.contains("?page=2"));

    let page_two = body_string(app.get("/?page=2").await).await;
    assert_eq!(page_two.matches("data-post-id=").count(), 4);
    assert!(page_two.contains("Page 2 of 2"));
    // The oldest entry only shows up on the last page.
    assert!(page_two.contains("entry 0"));
    assert!(!page_one.contains("entry 0"));
}

#[tokio::test]
async fn out_of_range_and_malformed_pages_are_not_found() {
    let app = build_app();
    let author = seed_user(&app.store, "elena").await;
    seed_post(&app.store, &author, None, "only entry").await;

    assert_eq!(app.get("/?page=2").await.status(), StatusCode::NOT_FOUND);
    assert_eq!(app.get("/?page=0").await.status(), StatusCode::NOT_FOUND);
    assert_eq!(app.get("/?page=abc").await.status(), StatusCode::NOT_FOUND);
    assert_eq!(app.get("/?page=-1").await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn group_feed_only_shows_posts_in_that_group() {
    let app = build_app();
    let author = seed_user(&app.store, "elena").await;
    let hiking = seed_group(&app.store, "Hiking", "hiking").await;
    let inside = seed_post(&app.store, &author, Some(&hiking), "trail report").await;
    let outside = seed_post(&app.store, &author, None, "grouped nowhere").await;

    let response = app.get("/group/hiking/").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("Hiking"));
    assert!(body.contains(&format!("data-post-id=\"{}\"", inside.id)));
    assert!(!body.contains(&format!("data-post-id=\"{}\"", outside.id)));
}

#[tokio::test]
async fn profile_feed_scopes_to_the_author_and_counts_all_posts() {
    let app = build_app();
    let elena = seed_user(&app.store, "elena").await;
    let marco = seed_user(&app.store, "marco").await;
    let hers = seed_post(&app.store, &elena, None, "by elena").await;
    let his = seed_post(&app.store, &marco, None, "by marco").await;
    seed_post(&app.store, &elena, None, "also by elena").await;

    let body = body_string(app.get("/profile/elena/").await).await;
    assert!(body.contains(&format!("data-post-id=\"{}\"", hers.id)));
    assert!(!body.contains(&format!("data-post-id=\"{}\"", his.id)));
    assert!(body.contains("2 posts"));
}

#[tokio::test]
async fn post_detail_shows_text_and_author_total() {
    let app = build_app();
    let author = seed_user(&app.store, "elena").await;
    let post = seed_post(&app.store, &author, None, "a full entry").await;
    seed_post(&app.store, &author, None, "another entry").await;

    let response = app.get(&format!("/posts/{}/", post.id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("a full entry"));
    assert!(body.contains("2 posts"));
    assert!(body.contains("No comments yet."));
    // Guests get a login prompt instead of the comment form.
    assert!(body.contains("to comment"));
    assert!(!body.contains("post-edit-link"));
}
