use askama::{Error as AskamaError, Template};
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;

use crate::application::error::{ErrorReport, HttpError};
use crate::application::feed::{GroupFeed, ProfileFeed};
use crate::application::pagination::Page;
use crate::application::posts::{PostDetail, PostFormErrors};
use crate::application::repos::{CommentListing, PostListing};
use crate::domain::entities::GroupRecord;
use crate::domain::posts::{excerpt, format_human_datetime, format_iso_datetime};

const CARD_EXCERPT_CHARS: usize = 300;

#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct TemplateRenderError {
    pub(crate) source: &'static str,
    pub(crate) public_message: &'static str,
    #[source]
    pub(crate) error: AskamaError,
}

impl TemplateRenderError {
    pub fn new(source: &'static str, public_message: &'static str, error: AskamaError) -> Self {
        Self {
            source,
            public_message,
            error,
        }
    }
}

impl From<TemplateRenderError> for HttpError {
    fn from(err: TemplateRenderError) -> Self {
        let TemplateRenderError {
            source,
            public_message,
            error,
        } = err;

        HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            public_message,
            &error,
        )
    }
}

pub fn render_template<T: Template>(template: T) -> Result<Html<String>, HttpError> {
    template.render().map(Html).map_err(|err| {
        TemplateRenderError::new(
            "presentation::views::render_template",
            "Template rendering failed",
            err,
        )
        .into()
    })
}

pub fn render_template_response<T: Template>(template: T, status: StatusCode) -> Response {
    match render_template(template) {
        Ok(html) => (status, html).into_response(),
        Err(err) => err.into_response(),
    }
}

pub fn render_not_found_response(chrome: SiteChrome) -> Response {
    let content = ErrorPageView::not_found();
    let view = LayoutContext::new(chrome, content);
    let mut response = render_template_response(ErrorTemplate { view }, StatusCode::NOT_FOUND);
    ErrorReport::from_message(
        "presentation::views::render_not_found_response",
        StatusCode::NOT_FOUND,
        "Resource not found",
    )
    .attach(&mut response);
    response
}

/// The signed-in user as the shared layout sees them.
#[derive(Clone)]
pub struct CurrentUserView {
    pub username: String,
}

/// Everything the base layout renders around the page content.
#[derive(Clone)]
pub struct SiteChrome {
    pub site_title: String,
    pub user: Option<CurrentUserView>,
}

#[derive(Clone)]
pub struct LayoutContext<T> {
    pub site_title: String,
    pub user: Option<CurrentUserView>,
    pub content: T,
}

impl<T> LayoutContext<T> {
    pub fn new(chrome: SiteChrome, content: T) -> Self {
        Self {
            site_title: chrome.site_title,
            user: chrome.user,
            content,
        }
    }
}

#[derive(Clone)]
pub struct PostCardView {
    pub id: String,
    pub author_username: String,
    pub group_title: Option<String>,
    pub group_slug: Option<String>,
    pub iso_date: String,
    pub published: String,
    pub excerpt: String,
    pub text: String,
    pub image_href: Option<String>,
}

impl PostCardView {
    pub fn from_listing(listing: &PostListing) -> Self {
        Self {
            id: listing.post.id.to_string(),
            author_username: listing.author_username.clone(),
            group_title: listing.group_title.clone(),
            group_slug: listing.group_slug.clone(),
            iso_date: format_iso_datetime(listing.post.pub_date),
            published: format_human_datetime(listing.post.pub_date),
            excerpt: excerpt(&listing.post.text, CARD_EXCERPT_CHARS),
            text: listing.post.text.clone(),
            image_href: listing
                .post
                .image_path
                .as_ref()
                .map(|path| format!("/media/{path}")),
        }
    }
}

#[derive(Clone)]
pub struct CommentView {
    pub author_username: String,
    pub published: String,
    pub text: String,
}

impl CommentView {
    pub fn from_listing(listing: &CommentListing) -> Self {
        Self {
            author_username: listing.author_username.clone(),
            published: format_human_datetime(listing.comment.created),
            text: listing.comment.text.clone(),
        }
    }
}

/// Previous/next links for a paginated listing.
#[derive(Clone)]
pub struct PagerView {
    pub current: u32,
    pub total: u32,
    pub prev_href: Option<String>,
    pub next_href: Option<String>,
}

impl PagerView {
    pub fn for_page<T>(base_path: &str, page: &Page<T>) -> Self {
        let prev_href = page
            .has_previous()
            .then(|| format!("{base_path}?page={}", page.number - 1));
        let next_href = page
            .has_next()
            .then(|| format!("{base_path}?page={}", page.number + 1));
        Self {
            current: page.number,
            total: page.total_pages,
            prev_href,
            next_href,
        }
    }
}

#[derive(Clone)]
pub struct FeedView {
    pub cards: Vec<PostCardView>,
    pub pager: PagerView,
}

impl FeedView {
    pub fn from_page(base_path: &str, page: &Page<PostListing>) -> Self {
        Self {
            cards: page.items.iter().map(PostCardView::from_listing).collect(),
            pager: PagerView::for_page(base_path, page),
        }
    }
}

#[derive(Clone)]
pub struct GroupFeedView {
    pub title: String,
    pub description: String,
    pub feed: FeedView,
}

impl GroupFeedView {
    pub fn from_feed(feed: &GroupFeed) -> Self {
        let base_path = format!("/group/{}/", feed.group.slug);
        Self {
            title: feed.group.title.clone(),
            description: feed.group.description.clone(),
            feed: FeedView::from_page(&base_path, &feed.page),
        }
    }
}

#[derive(Clone)]
pub struct ProfileFeedView {
    pub username: String,
    pub total_posts: u64,
    pub feed: FeedView,
}

impl ProfileFeedView {
    pub fn from_feed(feed: &ProfileFeed) -> Self {
        let base_path = format!("/profile/{}/", feed.author.username);
        Self {
            username: feed.author.username.clone(),
            total_posts: feed.total_posts,
            feed: FeedView::from_page(&base_path, &feed.page),
        }
    }
}

#[derive(Clone)]
pub struct PostDetailView {
    pub card: PostCardView,
    pub comments: Vec<CommentView>,
    /// True iff the viewer authored the post; gates the edit link.
    pub correct_user: bool,
    /// The author's all-time post count.
    pub amount: u64,
    pub comment_error: Option<&'static str>,
    pub comment_draft: String,
}

impl PostDetailView {
    pub fn from_detail(detail: &PostDetail, viewer_is_author: bool) -> Self {
        Self {
            card: PostCardView::from_listing(&detail.listing),
            comments: detail
                .comments
                .iter()
                .map(CommentView::from_listing)
                .collect(),
            correct_user: viewer_is_author,
            amount: detail.author_total,
            comment_error: None,
            comment_draft: String::new(),
        }
    }
}

#[derive(Clone)]
pub struct GroupOptionView {
    pub id: String,
    pub title: String,
}

impl GroupOptionView {
    pub fn from_record(record: &GroupRecord) -> Self {
        Self {
            id: record.id.to_string(),
            title: record.title.clone(),
        }
    }
}

#[derive(Clone)]
pub struct PostFormView {
    pub is_edit: bool,
    pub action: String,
    pub text: String,
    pub selected_group: String,
    pub groups: Vec<GroupOptionView>,
    pub errors: PostFormErrors,
}

#[derive(Clone)]
pub struct LoginView {
    pub next: String,
    pub username: String,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct SignupView {
    pub username: String,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct ErrorPageView {
    pub status: u16,
    pub title: String,
    pub message: String,
}

impl ErrorPageView {
    pub fn not_found() -> Self {
        Self {
            status: 404,
            title: "Page not found".to_string(),
            message: "The page you were looking for does not exist.".to_string(),
        }
    }
}

#[derive(Template)]
#[template(path = "feed.html")]
pub struct FeedTemplate {
    pub view: LayoutContext<FeedView>,
}

#[derive(Template)]
#[template(path = "group.html")]
pub struct GroupTemplate {
    pub view: LayoutContext<GroupFeedView>,
}

#[derive(Template)]
#[template(path = "profile.html")]
pub struct ProfileTemplate {
    pub view: LayoutContext<ProfileFeedView>,
}

#[derive(Template)]
#[template(path = "post_detail.html")]
pub struct PostDetailTemplate {
    pub view: LayoutContext<PostDetailView>,
}

#[derive(Template)]
#[template(path = "post_form.html")]
pub struct PostFormTemplate {
    pub view: LayoutContext<PostFormView>,
}

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub view: LayoutContext<LoginView>,
}

#[derive(Template)]
#[template(path = "signup.html")]
pub struct SignupTemplate {
    pub view: LayoutContext<SignupView>,
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate {
    pub view: LayoutContext<ErrorPageView>,
}
