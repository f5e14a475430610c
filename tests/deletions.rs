//! Side effects of removing groups and posts.

mod support;

use axum::http::StatusCode;
use quaderno::application::repos::{CommentsRepo, CreateCommentParams, GroupsRepo, PostsRepo};
use support::{body_string, build_app, seed_group, seed_post, seed_user};

#[tokio::test]
async fn removing_a_group_detaches_its_posts_instead_of_deleting_them() {
    let app = build_app();
    let author = seed_user(&app.store, "elena").await;
    let group = seed_group(&app.store, "Hiking", "hiking").await;
    seed_post(&app.store, &author, Some(&group), "trail notes").await;

    app.store.delete_group("hiking").await.expect("remove group");

    // The post survives on the global feed and the profile, minus its
    // group link.
    let home = body_string(app.get("/").await).await;
    assert!(home.contains("trail notes"));
    assert!(!home.contains("/group/hiking/"));

    let profile = body_string(app.get("/profile/elena/").await).await;
    assert!(profile.contains("trail notes"));

    // The group page itself is gone.
    let response = app.get("/group/hiking/").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn removing_a_post_takes_its_comments_with_it() {
    let app = build_app();
    let author = seed_user(&app.store, "elena").await;
    let post = seed_post(&app.store, &author, None, "short lived").await;
    app.store
        .create_comment(CreateCommentParams {
            text: "first".to_string(),
            post_id: post.id,
            author_id: author.id,
        })
        .await
        .expect("seed comment");
    assert_eq!(app.store.comment_count(), 1);

    app.store.delete_post(post.id).await.expect("remove post");

    assert_eq!(app.store.comment_count(), 0);
    let response = app.get(&format!("/posts/{}/", post.id)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
