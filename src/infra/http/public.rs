use std::{io::ErrorKind, sync::Arc};

use axum::{
    Extension, Form, Router,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{
        HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use bytes::Bytes;
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use crate::{
    application::{
        error::{ErrorReport, HttpError},
        feed::{FeedError, FeedService},
        pagination::PageNumber,
        posts::{CommentError, ImageUpload, PostActionError, PostDraft, PostFormErrors,
            PostService},
        repos::HealthRepo,
        sessions::{AuthenticatedUser, SessionService},
    },
    cache::{CacheState, page_cache_layer},
    infra::uploads::{MediaStorage, MediaStorageError},
    presentation::views::{
        CurrentUserView, FeedTemplate, FeedView, GroupFeedView, GroupOptionView, GroupTemplate,
        LayoutContext, PostDetailTemplate, PostDetailView, PostFormTemplate, PostFormView,
        ProfileFeedView, ProfileTemplate, SiteChrome, render_not_found_response,
        render_template_response,
    },
};

use super::{
    auth, db_health_response,
    middleware::{CurrentUser, load_current_user, log_responses, set_request_context},
    rate_limit::LoginRateLimiter,
    repo_error_to_http,
};

#[derive(Clone)]
pub struct HttpState {
    pub feed: Arc<FeedService>,
    pub posts: Arc<PostService>,
    pub sessions: Arc<SessionService>,
    pub health: Arc<dyn HealthRepo>,
    pub media: Arc<MediaStorage>,
    pub login_limiter: Arc<LoginRateLimiter>,
    pub cache: Option<CacheState>,
    pub site_title: String,
}

pub fn build_router(state: HttpState) -> Router {
    // Only the global feed is cached; every other route renders per request.
    let cached_routes = Router::new().route("/", get(index));
    let cached_routes = if let Some(cache_state) = state.cache.clone() {
        cached_routes.layer(middleware::from_fn_with_state(
            cache_state,
            page_cache_layer,
        ))
    } else {
        cached_routes
    };

    let routes = Router::new()
        .route("/group/{slug}/", get(group_feed))
        .route("/profile/{username}/", get(profile_feed))
        .route("/posts/{id}/", get(post_detail))
        .route("/create/", get(create_form).post(create_submit))
        .route("/posts/{id}/edit/", get(edit_form).post(edit_submit))
        .route("/posts/{id}/comment/", post(comment_submit))
        .route("/auth/login/", get(auth::login_form).post(auth::login_submit))
        .route("/auth/logout/", post(auth::logout))
        .route(
            "/auth/signup/",
            get(auth::signup_form).post(auth::signup_submit),
        )
        .route("/media/{*path}", get(serve_media))
        .route("/static/{*path}", get(crate::infra::assets::serve_static))
        .route("/healthz", get(healthz))
        .fallback(not_found);

    cached_routes
        .merge(routes)
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(state, load_current_user))
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

pub fn site_chrome(state: &HttpState, current: &CurrentUser) -> SiteChrome {
    SiteChrome {
        site_title: state.site_title.clone(),
        user: current.0.as_ref().map(|user| CurrentUserView {
            username: user.username.clone(),
        }),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PageQuery {
    page: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommentForm {
    #[serde(default)]
    text: String,
}

async fn index(
    State(state): State<HttpState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<PageQuery>,
) -> Response {
    let chrome = site_chrome(&state, &current);
    let number = match PageNumber::parse(query.page.as_deref()) {
        Ok(number) => number,
        Err(err) => return feed_error_to_response(FeedError::Page(err), chrome),
    };

    match state.feed.global_feed(number).await {
        Ok(page) => {
            let view = LayoutContext::new(chrome, FeedView::from_page("/", &page));
            render_template_response(FeedTemplate { view }, StatusCode::OK)
        }
        Err(err) => feed_error_to_response(err, chrome),
    }
}

async fn group_feed(
    State(state): State<HttpState>,
    Extension(current): Extension<CurrentUser>,
    Path(slug): Path<String>,
    Query(query): Query<PageQuery>,
) -> Response {
    let chrome = site_chrome(&state, &current);
    let number = match PageNumber::parse(query.page.as_deref()) {
        Ok(number) => number,
        Err(err) => return feed_error_to_response(FeedError::Page(err), chrome),
    };

    match state.feed.group_feed(&slug, number).await {
        Ok(feed) => {
            let view = LayoutContext::new(chrome, GroupFeedView::from_feed(&feed));
            render_template_response(GroupTemplate { view }, StatusCode::OK)
        }
        Err(err) => feed_error_to_response(err, chrome),
    }
}

async fn profile_feed(
    State(state): State<HttpState>,
    Extension(current): Extension<CurrentUser>,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> Response {
    let chrome = site_chrome(&state, &current);
    let number = match PageNumber::parse(query.page.as_deref()) {
        Ok(number) => number,
        Err(err) => return feed_error_to_response(FeedError::Page(err), chrome),
    };

    match state.feed.profile_feed(&username, number).await {
        Ok(feed) => {
            let view = LayoutContext::new(chrome, ProfileFeedView::from_feed(&feed));
            render_template_response(ProfileTemplate { view }, StatusCode::OK)
        }
        Err(err) => feed_error_to_response(err, chrome),
    }
}

async fn post_detail(
    State(state): State<HttpState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Response {
    let chrome = site_chrome(&state, &current);
    let Some(id) = parse_post_id(&id) else {
        return render_not_found_response(chrome);
    };
    render_detail(&state, chrome, &current, id, None, String::new(), StatusCode::OK).await
}

async fn render_detail(
    state: &HttpState,
    chrome: SiteChrome,
    current: &CurrentUser,
    id: Uuid,
    comment_error: Option<&'static str>,
    comment_draft: String,
    status: StatusCode,
) -> Response {
    match state.posts.detail(id).await {
        Ok(Some(detail)) => {
            let viewer_is_author = current
                .0
                .as_ref()
                .is_some_and(|user| user.user_id == detail.listing.post.author_id);
            let mut content = PostDetailView::from_detail(&detail, viewer_is_author);
            content.comment_error = comment_error;
            content.comment_draft = comment_draft;
            let view = LayoutContext::new(chrome, content);
            render_template_response(PostDetailTemplate { view }, status)
        }
        Ok(None) => render_not_found_response(chrome),
        Err(err) => repo_error_to_http("infra::http::public::post_detail", err).into_response(),
    }
}

async fn create_form(
    State(state): State<HttpState>,
    Extension(current): Extension<CurrentUser>,
) -> Response {
    if let Err(redirect) = require_user(&current, "/create/") {
        return redirect;
    }
    let chrome = site_chrome(&state, &current);
    render_post_form(
        &state,
        chrome,
        PostFormView {
            is_edit: false,
            action: "/create/".to_string(),
            text: String::new(),
            selected_group: String::new(),
            groups: Vec::new(),
            errors: PostFormErrors::default(),
        },
        StatusCode::OK,
    )
    .await
}

async fn create_submit(
    State(state): State<HttpState>,
    Extension(current): Extension<CurrentUser>,
    multipart: Multipart,
) -> Response {
    let user = match require_user(&current, "/create/") {
        Ok(user) => user,
        Err(redirect) => return redirect,
    };
    let chrome = site_chrome(&state, &current);
    let draft = match read_post_draft(multipart).await {
        Ok(draft) => draft,
        Err(err) => return err.into_response(),
    };

    match state.posts.create(user.user_id, draft.clone()).await {
        Ok(_record) => Redirect::to(&format!("/profile/{}/", user.username)).into_response(),
        Err(PostActionError::Invalid(errors)) => {
            render_post_form(
                &state,
                chrome,
                PostFormView {
                    is_edit: false,
                    action: "/create/".to_string(),
                    text: draft.text,
                    selected_group: draft.group.unwrap_or_default(),
                    groups: Vec::new(),
                    errors,
                },
                StatusCode::OK,
            )
            .await
        }
        Err(err) => post_action_error_to_response(
            "infra::http::public::create_submit",
            err,
            chrome,
            None,
        ),
    }
}

async fn edit_form(
    State(state): State<HttpState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Response {
    let chrome = site_chrome(&state, &current);
    let Some(id) = parse_post_id(&id) else {
        return render_not_found_response(chrome);
    };
    let user = match require_user(&current, &format!("/posts/{id}/edit/")) {
        Ok(user) => user,
        Err(redirect) => return redirect,
    };

    let existing = match state.posts.detail(id).await {
        Ok(Some(detail)) => detail,
        Ok(None) => return render_not_found_response(chrome),
        Err(err) => {
            return repo_error_to_http("infra::http::public::edit_form", err).into_response();
        }
    };
    // Non-authors are sent to the readable detail page, not an error.
    if existing.listing.post.author_id != user.user_id {
        return Redirect::to(&format!("/posts/{id}/")).into_response();
    }

    render_post_form(
        &state,
        chrome,
        PostFormView {
            is_edit: true,
            action: format!("/posts/{id}/edit/"),
            text: existing.listing.post.text.clone(),
            selected_group: existing
                .listing
                .post
                .group_id
                .map(|group_id| group_id.to_string())
                .unwrap_or_default(),
            groups: Vec::new(),
            errors: PostFormErrors::default(),
        },
        StatusCode::OK,
    )
    .await
}

async fn edit_submit(
    State(state): State<HttpState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Response {
    let chrome = site_chrome(&state, &current);
    let Some(id) = parse_post_id(&id) else {
        return render_not_found_response(chrome);
    };
    let user = match require_user(&current, &format!("/posts/{id}/edit/")) {
        Ok(user) => user,
        Err(redirect) => return redirect,
    };
    let draft = match read_post_draft(multipart).await {
        Ok(draft) => draft,
        Err(err) => return err.into_response(),
    };

    match state.posts.edit(user.user_id, id, draft.clone()).await {
        Ok(record) => Redirect::to(&format!("/posts/{}/", record.id)).into_response(),
        Err(PostActionError::Invalid(errors)) => {
            render_post_form(
                &state,
                chrome,
                PostFormView {
                    is_edit: true,
                    action: format!("/posts/{id}/edit/"),
                    text: draft.text,
                    selected_group: draft.group.unwrap_or_default(),
                    groups: Vec::new(),
                    errors,
                },
                StatusCode::OK,
            )
            .await
        }
        Err(err) => post_action_error_to_response(
            "infra::http::public::edit_submit",
            err,
            chrome,
            Some(id),
        ),
    }
}

async fn comment_submit(
    State(state): State<HttpState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    Form(form): Form<CommentForm>,
) -> Response {
    let chrome = site_chrome(&state, &current);
    let Some(id) = parse_post_id(&id) else {
        return render_not_found_response(chrome);
    };
    let user = match require_user(&current, &format!("/posts/{id}/")) {
        Ok(user) => user,
        Err(redirect) => return redirect,
    };

    match state.posts.add_comment(user.user_id, id, &form.text).await {
        Ok(_comment) => Redirect::to(&format!("/posts/{id}/")).into_response(),
        Err(CommentError::EmptyText) => {
            render_detail(
                &state,
                chrome,
                &current,
                id,
                Some("Comment text must not be empty."),
                form.text,
                StatusCode::OK,
            )
            .await
        }
        Err(CommentError::UnknownPost) => render_not_found_response(chrome),
        Err(CommentError::Repo(err)) => {
            repo_error_to_http("infra::http::public::comment_submit", err).into_response()
        }
    }
}

async fn serve_media(State(state): State<HttpState>, Path(path): Path<String>) -> Response {
    const SOURCE: &str = "infra::http::public::serve_media";

    match state.media.read(&path).await {
        Ok(bytes) => build_media_response(&path, bytes),
        Err(MediaStorageError::InvalidPath) => HttpError::new(
            SOURCE,
            StatusCode::NOT_FOUND,
            "Upload not found",
            "The requested upload is not available",
        )
        .into_response(),
        Err(MediaStorageError::Io(err)) if err.kind() == ErrorKind::NotFound => HttpError::new(
            SOURCE,
            StatusCode::NOT_FOUND,
            "Upload not found",
            "The requested upload is not available",
        )
        .into_response(),
        Err(err) => {
            error!(
                target = SOURCE,
                path = %path,
                error = %err,
                "failed to read stored upload"
            );
            HttpError::new(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read uploaded file",
                err.to_string(),
            )
            .into_response()
        }
    }
}

async fn healthz(State(state): State<HttpState>) -> Response {
    db_health_response(state.health.ping().await)
}

async fn not_found(
    State(state): State<HttpState>,
    Extension(current): Extension<CurrentUser>,
) -> Response {
    render_not_found_response(site_chrome(&state, &current))
}

fn require_user(current: &CurrentUser, next: &str) -> Result<AuthenticatedUser, Response> {
    match &current.0 {
        Some(user) => Ok(user.clone()),
        None => Err(Redirect::to(&format!("/auth/login/?next={next}")).into_response()),
    }
}

fn parse_post_id(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw).ok()
}

/// Render the create/edit form, filling in the group options. The caller
/// leaves `groups` empty; the select list always shows the live set.
async fn render_post_form(
    state: &HttpState,
    chrome: SiteChrome,
    mut view: PostFormView,
    status: StatusCode,
) -> Response {
    match state.posts.groups_for_form().await {
        Ok(groups) => {
            view.groups = groups.iter().map(GroupOptionView::from_record).collect();
            render_template_response(
                PostFormTemplate {
                    view: LayoutContext::new(chrome, view),
                },
                status,
            )
        }
        Err(err) => {
            repo_error_to_http("infra::http::public::render_post_form", err).into_response()
        }
    }
}

fn post_action_error_to_response(
    source: &'static str,
    err: PostActionError,
    chrome: SiteChrome,
    post_id: Option<Uuid>,
) -> Response {
    match err {
        PostActionError::Invalid(_) => {
            // Handled by the callers; reaching here means a handler bug.
            HttpError::new(
                source,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                "validation error escaped the form handler",
            )
            .into_response()
        }
        PostActionError::NotFound => render_not_found_response(chrome),
        PostActionError::NotAuthor => match post_id {
            Some(id) => Redirect::to(&format!("/posts/{id}/")).into_response(),
            None => render_not_found_response(chrome),
        },
        PostActionError::Repo(err) => repo_error_to_http(source, err).into_response(),
        PostActionError::Storage(err) => HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to store uploaded image",
            &err,
        )
        .into_response(),
    }
}

async fn read_post_draft(mut multipart: Multipart) -> Result<PostDraft, HttpError> {
    const SOURCE: &str = "infra::http::public::read_post_draft";

    let mut draft = PostDraft::default();
    loop {
        let field = multipart.next_field().await.map_err(|err| {
            HttpError::from_error(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "Malformed form submission",
                &err,
            )
        })?;
        let Some(field) = field else { break };

        match field.name() {
            Some("text") => {
                draft.text = field.text().await.map_err(|err| {
                    HttpError::from_error(
                        SOURCE,
                        StatusCode::BAD_REQUEST,
                        "Malformed form submission",
                        &err,
                    )
                })?;
            }
            Some("group") => {
                draft.group = Some(field.text().await.map_err(|err| {
                    HttpError::from_error(
                        SOURCE,
                        StatusCode::BAD_REQUEST,
                        "Malformed form submission",
                        &err,
                    )
                })?);
            }
            Some("image") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data: Bytes = field.bytes().await.map_err(|err| {
                    HttpError::from_error(
                        SOURCE,
                        StatusCode::BAD_REQUEST,
                        "Malformed form submission",
                        &err,
                    )
                })?;
                if !filename.is_empty() && !data.is_empty() {
                    draft.image = Some(ImageUpload { filename, data });
                }
            }
            _ => {}
        }
    }
    Ok(draft)
}

fn feed_error_to_response(err: FeedError, chrome: SiteChrome) -> Response {
    match err {
        FeedError::UnknownGroup | FeedError::UnknownAuthor | FeedError::Page(_) => {
            let detail = err.to_string();
            let mut response = render_not_found_response(chrome);
            ErrorReport::from_message(
                "infra::http::public::feed_error_to_response",
                StatusCode::NOT_FOUND,
                detail,
            )
            .attach(&mut response);
            response
        }
        err => HttpError::from(err).into_response(),
    }
}

fn build_media_response(path: &str, bytes: Bytes) -> Response {
    let mut response = Response::new(Body::from(bytes.clone()));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&bytes.len().to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );

    response
}
