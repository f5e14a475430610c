//! In-memory repositories and router plumbing shared by the integration tests.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, Response, StatusCode, header};
use http_body_util::BodyExt;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};
use tower::ServiceExt;
use uuid::Uuid;

use quaderno::application::feed::FeedService;
use quaderno::application::posts::PostService;
use quaderno::application::repos::{
    CommentListing, CommentsRepo, CreateCommentParams, CreateGroupParams, CreatePostParams,
    CreateSessionParams, CreateUserParams, FeedScope, GroupsRepo, HealthRepo, PostListing,
    PostsRepo, RepoError, SessionsRepo, UpdatePostParams, UsersRepo,
};
use quaderno::application::sessions::SessionService;
use quaderno::cache::{CacheConfig, CacheState};
use quaderno::config::LoginRateLimitSettings;
use quaderno::domain::entities::{
    CommentRecord, GroupRecord, PostRecord, SessionRecord, UserRecord,
};
use quaderno::infra::http::{HttpState, LoginRateLimiter, build_router};
use quaderno::infra::uploads::MediaStorage;

/// A 1x1 GIF, enough to satisfy the image dimension probe.
pub const TINY_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x2c, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02,
    0x02, 0x44, 0x01, 0x00, 0x3b,
];

/// Shared in-memory backing store standing in for Postgres.
#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<Vec<UserRecord>>,
    groups: Mutex<Vec<GroupRecord>>,
    posts: Mutex<Vec<PostRecord>>,
    comments: Mutex<Vec<CommentRecord>>,
    sessions: Mutex<Vec<SessionRecord>>,
    ticks: Mutex<i64>,
}

impl MemoryStore {
    /// Monotonically increasing timestamps so newest-first ordering is
    /// deterministic regardless of wall-clock resolution.
    fn next_instant(&self) -> OffsetDateTime {
        let mut ticks = self.ticks.lock().unwrap();
        *ticks += 1;
        datetime!(2026-01-01 00:00:00 UTC) + Duration::seconds(*ticks)
    }

    pub fn post(&self, id: Uuid) -> Option<PostRecord> {
        self.posts.lock().unwrap().iter().find(|p| p.id == id).cloned()
    }

    pub fn post_by_text(&self, text: &str) -> Option<PostRecord> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.text == text)
            .cloned()
    }

    pub fn post_count(&self) -> usize {
        self.posts.lock().unwrap().len()
    }

    pub fn comment_count(&self) -> usize {
        self.comments.lock().unwrap().len()
    }

    fn listing_for(&self, post: &PostRecord) -> PostListing {
        let author_username = self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.id == post.author_id)
            .map(|u| u.username.clone())
            .unwrap_or_default();
        let (group_title, group_slug) = match post.group_id {
            Some(group_id) => self
                .groups
                .lock()
                .unwrap()
                .iter()
                .find(|g| g.id == group_id)
                .map(|g| (Some(g.title.clone()), Some(g.slug.clone())))
                .unwrap_or((None, None)),
            None => (None, None),
        };
        PostListing {
            post: post.clone(),
            author_username,
            group_title,
            group_slug,
        }
    }

    fn scoped_posts(&self, scope: FeedScope) -> Vec<PostRecord> {
        let mut posts: Vec<PostRecord> = self
            .posts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| match scope {
                FeedScope::Global => true,
                FeedScope::Group(id) => p.group_id == Some(id),
                FeedScope::Author(id) => p.author_id == id,
            })
            .cloned()
            .collect();
        posts.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));
        posts
    }
}

#[async_trait]
impl UsersRepo for MemoryStore {
    async fn create_user(&self, params: CreateUserParams) -> Result<UserRecord, RepoError> {
        let mut users = self.users.lock().unwrap();
        if users.iter().any(|u| u.username == params.username) {
            return Err(RepoError::Duplicate {
                constraint: "users_username_key".to_string(),
            });
        }
        let record = UserRecord {
            id: Uuid::new_v4(),
            username: params.username,
            password_hash: params.password_hash,
            created_at: self.next_instant(),
        };
        users.push(record.clone());
        Ok(record)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, RepoError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, RepoError> {
        Ok(self.users.lock().unwrap().iter().find(|u| u.id == id).cloned())
    }
}

#[async_trait]
impl GroupsRepo for MemoryStore {
    async fn create_group(&self, params: CreateGroupParams) -> Result<GroupRecord, RepoError> {
        let mut groups = self.groups.lock().unwrap();
        if groups.iter().any(|g| g.slug == params.slug) {
            return Err(RepoError::Duplicate {
                constraint: "groups_slug_key".to_string(),
            });
        }
        let record = GroupRecord {
            id: Uuid::new_v4(),
            title: params.title,
            slug: params.slug,
            description: params.description,
            created_at: self.next_instant(),
        };
        groups.push(record.clone());
        Ok(record)
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<GroupRecord>, RepoError> {
        Ok(self
            .groups
            .lock()
            .unwrap()
            .iter()
            .find(|g| g.slug == slug)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<GroupRecord>, RepoError> {
        Ok(self.groups.lock().unwrap().iter().find(|g| g.id == id).cloned())
    }

    async fn list_groups(&self) -> Result<Vec<GroupRecord>, RepoError> {
        let mut groups = self.groups.lock().unwrap().clone();
        groups.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(groups)
    }

    async fn delete_group(&self, slug: &str) -> Result<(), RepoError> {
        let mut groups = self.groups.lock().unwrap();
        let Some(position) = groups.iter().position(|g| g.slug == slug) else {
            return Err(RepoError::NotFound);
        };
        let removed = groups.remove(position);
        for post in self.posts.lock().unwrap().iter_mut() {
            if post.group_id == Some(removed.id) {
                post.group_id = None;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PostsRepo for MemoryStore {
    async fn list_posts(
        &self,
        scope: FeedScope,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<PostListing>, RepoError> {
        Ok(self
            .scoped_posts(scope)
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|post| self.listing_for(post))
            .collect())
    }

    async fn count_posts(&self, scope: FeedScope) -> Result<u64, RepoError> {
        Ok(self.scoped_posts(scope).len() as u64)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PostListing>, RepoError> {
        let post = self.posts.lock().unwrap().iter().find(|p| p.id == id).cloned();
        Ok(post.map(|post| self.listing_for(&post)))
    }

    async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, RepoError> {
        let record = PostRecord {
            id: Uuid::new_v4(),
            text: params.text,
            pub_date: self.next_instant(),
            author_id: params.author_id,
            group_id: params.group_id,
            image_path: params.image_path,
        };
        self.posts.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn update_post(&self, params: UpdatePostParams) -> Result<PostRecord, RepoError> {
        let mut posts = self.posts.lock().unwrap();
        let Some(post) = posts.iter_mut().find(|p| p.id == params.id) else {
            return Err(RepoError::NotFound);
        };
        post.text = params.text;
        post.group_id = params.group_id;
        if let Some(image_path) = params.image_path {
            post.image_path = Some(image_path);
        }
        Ok(post.clone())
    }

    async fn delete_post(&self, id: Uuid) -> Result<(), RepoError> {
        let mut posts = self.posts.lock().unwrap();
        let Some(position) = posts.iter().position(|p| p.id == id) else {
            return Err(RepoError::NotFound);
        };
        posts.remove(position);
        self.comments.lock().unwrap().retain(|c| c.post_id != id);
        Ok(())
    }
}

#[async_trait]
impl CommentsRepo for MemoryStore {
    async fn list_for_post(&self, post_id: Uuid) -> Result<Vec<CommentListing>, RepoError> {
        let mut comments: Vec<CommentRecord> = self
            .comments
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.post_id == post_id)
            .cloned()
            .collect();
        comments.sort_by(|a, b| a.created.cmp(&b.created));
        let users = self.users.lock().unwrap();
        Ok(comments
            .into_iter()
            .map(|comment| {
                let author_username = users
                    .iter()
                    .find(|u| u.id == comment.author_id)
                    .map(|u| u.username.clone())
                    .unwrap_or_default();
                CommentListing {
                    comment,
                    author_username,
                }
            })
            .collect())
    }

    async fn create_comment(
        &self,
        params: CreateCommentParams,
    ) -> Result<CommentRecord, RepoError> {
        let record = CommentRecord {
            id: Uuid::new_v4(),
            text: params.text,
            post_id: params.post_id,
            author_id: params.author_id,
            created: self.next_instant(),
        };
        self.comments.lock().unwrap().push(record.clone());
        Ok(record)
    }
}

#[async_trait]
impl SessionsRepo for MemoryStore {
    async fn insert_session(
        &self,
        params: CreateSessionParams,
    ) -> Result<SessionRecord, RepoError> {
        let record = SessionRecord {
            id: Uuid::new_v4(),
            token_prefix: params.token_prefix,
            hashed_secret: params.hashed_secret,
            user_id: params.user_id,
            created_at: self.next_instant(),
            last_seen_at: None,
        };
        self.sessions.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn find_by_prefix(&self, prefix: &str) -> Result<Option<SessionRecord>, RepoError> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.token_prefix == prefix)
            .cloned())
    }

    async fn delete_session(&self, id: Uuid) -> Result<(), RepoError> {
        self.sessions.lock().unwrap().retain(|s| s.id != id);
        Ok(())
    }

    async fn update_last_seen(
        &self,
        id: Uuid,
        last_seen_at: OffsetDateTime,
    ) -> Result<(), RepoError> {
        if let Some(session) = self.sessions.lock().unwrap().iter_mut().find(|s| s.id == id) {
            session.last_seen_at = Some(last_seen_at);
        }
        Ok(())
    }
}

#[async_trait]
impl HealthRepo for MemoryStore {
    async fn ping(&self) -> Result<(), RepoError> {
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    _media_dir: tempfile::TempDir,
}

pub fn build_app() -> TestApp {
    build_app_with_cache(None)
}

pub fn build_app_with_cache(cache: Option<CacheConfig>) -> TestApp {
    let store = Arc::new(MemoryStore::default());
    let media_dir = tempfile::tempdir().expect("media tempdir");
    let media = Arc::new(MediaStorage::new(media_dir.path().to_path_buf()).expect("media root"));

    let posts_repo: Arc<dyn PostsRepo> = store.clone();
    let groups_repo: Arc<dyn GroupsRepo> = store.clone();
    let users_repo: Arc<dyn UsersRepo> = store.clone();
    let comments_repo: Arc<dyn CommentsRepo> = store.clone();
    let sessions_repo: Arc<dyn SessionsRepo> = store.clone();
    let health_repo: Arc<dyn HealthRepo> = store.clone();

    let feed = Arc::new(FeedService::new(
        posts_repo.clone(),
        groups_repo.clone(),
        users_repo.clone(),
        NonZeroU32::new(10).unwrap(),
    ));
    let posts = Arc::new(PostService::new(
        posts_repo,
        groups_repo,
        comments_repo,
        media.clone(),
    ));
    let sessions = Arc::new(SessionService::new(users_repo, sessions_repo));

    let state = HttpState {
        feed,
        posts,
        sessions,
        health: health_repo,
        media,
        login_limiter: Arc::new(LoginRateLimiter::new(&LoginRateLimitSettings {
            window_seconds: NonZeroU32::new(300).unwrap(),
            max_attempts: NonZeroU32::new(10).unwrap(),
        })),
        cache: cache.map(CacheState::new),
        site_title: "Quaderno".to_string(),
    };

    TestApp {
        router: build_router(state),
        store,
        _media_dir: media_dir,
    }
}

impl TestApp {
    pub async fn get(&self, path: &str) -> Response<Body> {
        self.request(Request::get(path).body(Body::empty()).unwrap()).await
    }

    pub async fn get_with_cookie(&self, path: &str, cookie: &str) -> Response<Body> {
        self.request(
            Request::get(path)
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn post_form(
        &self,
        path: &str,
        body: &str,
        cookie: Option<&str>,
    ) -> Response<Body> {
        let mut builder = Request::post(path).header(
            header::CONTENT_TYPE,
            "application/x-www-form-urlencoded",
        );
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.request(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    /// Like `post_form`, but pretending the request arrived from `client`.
    pub async fn post_form_from(
        &self,
        path: &str,
        body: &str,
        client: IpAddr,
    ) -> Response<Body> {
        let mut request = Request::post(path)
            .header(
                header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(Body::from(body.to_string()))
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::new(client, 49152)));
        self.request(request).await
    }

    pub async fn post_multipart(
        &self,
        path: &str,
        form: MultipartForm,
        cookie: Option<&str>,
    ) -> Response<Body> {
        let (content_type, body) = form.encode();
        let mut builder = Request::post(path).header(header::CONTENT_TYPE, content_type);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.request(builder.body(Body::from(body)).unwrap()).await
    }

    async fn request(&self, mut request: Request<Body>) -> Response<Body> {
        // `oneshot` bypasses the connect-info make_service, so stamp a
        // default loopback peer unless the test picked its own.
        if request.extensions().get::<ConnectInfo<SocketAddr>>().is_none() {
            request
                .extensions_mut()
                .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 49152))));
        }
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router must be infallible")
    }

    /// Sign up through the router and return the session cookie pair.
    pub async fn signup(&self, username: &str, password: &str) -> String {
        let response = self
            .post_form(
                "/auth/signup/",
                &format!("username={username}&password={password}"),
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER, "signup must redirect");
        session_cookie(&response)
    }
}

/// Seed a user straight into the store, bypassing the signup form.
pub async fn seed_user(store: &MemoryStore, username: &str) -> UserRecord {
    store
        .create_user(CreateUserParams {
            username: username.to_string(),
            password_hash: "unused".to_string(),
        })
        .await
        .expect("seed user")
}

pub async fn seed_group(store: &MemoryStore, title: &str, slug: &str) -> GroupRecord {
    store
        .create_group(CreateGroupParams {
            title: title.to_string(),
            slug: slug.to_string(),
            description: String::new(),
        })
        .await
        .expect("seed group")
}

pub async fn seed_post(
    store: &MemoryStore,
    author: &UserRecord,
    group: Option<&GroupRecord>,
    text: &str,
) -> PostRecord {
    store
        .create_post(CreatePostParams {
            text: text.to_string(),
            author_id: author.id,
            group_id: group.map(|g| g.id),
            image_path: None,
        })
        .await
        .expect("seed post")
}

/// Extract the `name=value` pair from the first `Set-Cookie` header.
pub fn session_cookie(response: &Response<Body>) -> String {
    let raw = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("Set-Cookie header")
        .to_str()
        .expect("cookie is ascii");
    raw.split(';').next().expect("cookie pair").to_string()
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("body is utf-8")
}

pub fn location(response: &Response<Body>) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .expect("Location header")
        .to_str()
        .expect("location is ascii")
}

/// Builder for `multipart/form-data` post submissions.
#[derive(Default)]
pub struct MultipartForm {
    text: Option<String>,
    group: Option<String>,
    image: Option<(String, Vec<u8>)>,
}

impl MultipartForm {
    pub fn text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    pub fn image(mut self, filename: &str, data: &[u8]) -> Self {
        self.image = Some((filename.to_string(), data.to_vec()));
        self
    }

    fn encode(self) -> (String, Vec<u8>) {
        const BOUNDARY: &str = "quaderno-test-boundary";
        let mut body = Vec::new();
        if let Some(text) = self.text {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"text\"\r\n\r\n{text}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some(group) = self.group {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"group\"\r\n\r\n{group}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some((filename, data)) = self.image {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(&data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        (
            format!("multipart/form-data; boundary={BOUNDARY}"),
            body,
        )
    }
}
