//! Login, signup, and logout over session cookies.

use std::net::SocketAddr;

use axum::{
    Extension, Form,
    extract::{ConnectInfo, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::{
    CookieJar,
    cookie::{Cookie, SameSite},
};
use serde::Deserialize;

use crate::application::error::HttpError;
use crate::application::sessions::{LoginError, SignupError};
use crate::presentation::views::{
    LayoutContext, LoginTemplate, LoginView, SignupTemplate, SignupView, render_template_response,
};

use super::middleware::CurrentUser;
use super::public::{HttpState, site_chrome};

pub const SESSION_COOKIE: &str = "quaderno_session";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NextQuery {
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SignupForm {
    pub username: String,
    pub password: String,
}

/// Keep only local absolute paths as post-login targets; anything else,
/// including protocol-relative `//host` forms, falls back to the feed.
pub fn safe_next(raw: Option<&str>) -> String {
    match raw {
        Some(path) if path.starts_with('/') && !path.starts_with("//") => path.to_string(),
        _ => "/".to_string(),
    }
}

fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

pub async fn login_form(
    State(state): State<HttpState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<NextQuery>,
) -> Response {
    render_login(
        &state,
        &current,
        LoginView {
            next: safe_next(query.next.as_deref()),
            username: String::new(),
            error: None,
        },
        StatusCode::OK,
    )
}

pub async fn login_submit(
    State(state): State<HttpState>,
    Extension(current): Extension<CurrentUser>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    let next = safe_next(form.next.as_deref());
    let username = form.username.trim().to_string();

    if !state.login_limiter.allow(&username, client.ip()) {
        return render_login(
            &state,
            &current,
            LoginView {
                next,
                username,
                error: Some("Too many login attempts. Try again later.".to_string()),
            },
            StatusCode::TOO_MANY_REQUESTS,
        );
    }

    match state.sessions.login(&username, &form.password).await {
        Ok((_user, issued)) => {
            state.login_limiter.reset(&username);
            (jar.add(session_cookie(issued.token)), Redirect::to(&next)).into_response()
        }
        Err(LoginError::InvalidCredentials) => render_login(
            &state,
            &current,
            LoginView {
                next,
                username,
                error: Some("Invalid username or password.".to_string()),
            },
            StatusCode::OK,
        ),
        Err(LoginError::Repo(err)) => HttpError::from_error(
            "infra::http::auth::login_submit",
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
            &err,
        )
        .into_response(),
    }
}

pub async fn signup_form(
    State(state): State<HttpState>,
    Extension(current): Extension<CurrentUser>,
) -> Response {
    render_signup(
        &state,
        &current,
        SignupView {
            username: String::new(),
            error: None,
        },
        StatusCode::OK,
    )
}

pub async fn signup_submit(
    State(state): State<HttpState>,
    Extension(current): Extension<CurrentUser>,
    jar: CookieJar,
    Form(form): Form<SignupForm>,
) -> Response {
    match state.sessions.signup(&form.username, &form.password).await {
        Ok((_user, issued)) => {
            (jar.add(session_cookie(issued.token)), Redirect::to("/")).into_response()
        }
        Err(err) => {
            let message = match err {
                SignupError::UsernameTaken => "That username is already taken.".to_string(),
                SignupError::InvalidUsername { reason } => {
                    format!("Invalid username: {reason}.")
                }
                SignupError::WeakPassword => {
                    "Password must be at least 8 characters.".to_string()
                }
                SignupError::Repo(err) => {
                    return HttpError::from_error(
                        "infra::http::auth::signup_submit",
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal server error",
                        &err,
                    )
                    .into_response();
                }
                SignupError::Hashing => {
                    return HttpError::new(
                        "infra::http::auth::signup_submit",
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal server error",
                        "password hashing failed",
                    )
                    .into_response();
                }
            };
            render_signup(
                &state,
                &current,
                SignupView {
                    username: form.username.trim().to_string(),
                    error: Some(message),
                },
                StatusCode::OK,
            )
        }
    }
}

pub async fn logout(State(state): State<HttpState>, jar: CookieJar) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Err(err) = state.sessions.logout(cookie.value()).await {
            tracing::warn!(
                target = "quaderno::http::auth",
                error = %err,
                "failed to close session on logout"
            );
        }
    }
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (jar, Redirect::to("/")).into_response()
}

fn render_login(
    state: &HttpState,
    current: &CurrentUser,
    view: LoginView,
    status: StatusCode,
) -> Response {
    let chrome = site_chrome(state, current);
    render_template_response(
        LoginTemplate {
            view: LayoutContext::new(chrome, view),
        },
        status,
    )
}

fn render_signup(
    state: &HttpState,
    current: &CurrentUser,
    view: SignupView,
    status: StatusCode,
) -> Response {
    let chrome = site_chrome(state, current);
    render_template_response(
        SignupTemplate {
            view: LayoutContext::new(chrome, view),
        },
        status,
    )
}
