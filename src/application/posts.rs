//! Write side of posts and comments, plus the post detail read model.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use uuid::Uuid;

use crate::application::repos::{
    CommentListing, CommentsRepo, CreateCommentParams, CreatePostParams, FeedScope, GroupsRepo,
    PostListing, PostsRepo, RepoError, UpdatePostParams,
};
use crate::domain::entities::{CommentRecord, GroupRecord, PostRecord};
use crate::infra::uploads::{MediaStorage, MediaStorageError};

/// Raw form input for creating or editing a post. `group` carries the id the
/// `<select>` submitted; an empty string means "no group".
#[derive(Debug, Clone, Default)]
pub struct PostDraft {
    pub text: String,
    pub group: Option<String>,
    pub image: Option<ImageUpload>,
}

#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub filename: String,
    pub data: Bytes,
}

/// Per-field validation messages, rendered next to the offending input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostFormErrors {
    pub text: Option<&'static str>,
    pub group: Option<&'static str>,
    pub image: Option<&'static str>,
}

impl PostFormErrors {
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.group.is_none() && self.image.is_none()
    }
}

#[derive(Debug, Error)]
pub enum PostActionError {
    #[error("post form failed validation")]
    Invalid(PostFormErrors),
    #[error("post not found")]
    NotFound,
    #[error("only the author may change a post")]
    NotAuthor,
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Storage(#[from] MediaStorageError),
}

#[derive(Debug, Error)]
pub enum CommentError {
    #[error("comment text must not be empty")]
    EmptyText,
    #[error("post not found")]
    UnknownPost,
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Everything the post detail page shows.
#[derive(Debug, Clone)]
pub struct PostDetail {
    pub listing: PostListing,
    pub comments: Vec<CommentListing>,
    pub author_total: u64,
}

#[derive(Clone)]
pub struct PostService {
    posts: Arc<dyn PostsRepo>,
    groups: Arc<dyn GroupsRepo>,
    comments: Arc<dyn CommentsRepo>,
    media: Arc<MediaStorage>,
}

impl PostService {
    pub fn new(
        posts: Arc<dyn PostsRepo>,
        groups: Arc<dyn GroupsRepo>,
        comments: Arc<dyn CommentsRepo>,
        media: Arc<MediaStorage>,
    ) -> Self {
        Self {
            posts,
            groups,
            comments,
            media,
        }
    }

    pub async fn detail(&self, id: Uuid) -> Result<Option<PostDetail>, RepoError> {
        let Some(listing) = self.posts.find_by_id(id).await? else {
            return Ok(None);
        };
        let comments = self.comments.list_for_post(id).await?;
        let author_total = self
            .posts
            .count_posts(FeedScope::Author(listing.post.author_id))
            .await?;
        Ok(Some(PostDetail {
            listing,
            comments,
            author_total,
        }))
    }

    pub async fn groups_for_form(&self) -> Result<Vec<GroupRecord>, RepoError> {
        self.groups.list_groups().await
    }

    pub async fn create(
        &self,
        author_id: Uuid,
        draft: PostDraft,
    ) -> Result<PostRecord, PostActionError> {
        let (text, group_id, image) = self.validate(&draft).await?;
        let image_path = match image {
            Some(upload) => Some(self.store_image(upload).await?),
            None => None,
        };

        let record = self
            .posts
            .create_post(CreatePostParams {
                text,
                author_id,
                group_id,
                image_path,
            })
            .await?;
        metrics::counter!("quaderno_posts_created_total").increment(1);
        tracing::info!(post = %record.id, author = %author_id, "post created");
        Ok(record)
    }

    /// Update a post in place. Publication time is never touched; the image is
    /// replaced only when the draft carries a new one.
    pub async fn edit(
        &self,
        editor_id: Uuid,
        post_id: Uuid,
        draft: PostDraft,
    ) -> Result<PostRecord, PostActionError> {
        let existing = self
            .posts
            .find_by_id(post_id)
            .await?
            .ok_or(PostActionError::NotFound)?;
        if existing.post.author_id != editor_id {
            return Err(PostActionError::NotAuthor);
        }

        let (text, group_id, image) = self.validate(&draft).await?;
        let image_path = match image {
            Some(upload) => Some(self.store_image(upload).await?),
            None => None,
        };

        let record = self
            .posts
            .update_post(UpdatePostParams {
                id: post_id,
                text,
                group_id,
                image_path,
            })
            .await?;
        tracing::info!(post = %record.id, editor = %editor_id, "post edited");
        Ok(record)
    }

    pub async fn add_comment(
        &self,
        author_id: Uuid,
        post_id: Uuid,
        text: &str,
    ) -> Result<CommentRecord, CommentError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(CommentError::EmptyText);
        }
        if self.posts.find_by_id(post_id).await?.is_none() {
            return Err(CommentError::UnknownPost);
        }

        let record = self
            .comments
            .create_comment(CreateCommentParams {
                post_id,
                author_id,
                text: trimmed.to_string(),
            })
            .await?;
        metrics::counter!("quaderno_comments_created_total").increment(1);
        Ok(record)
    }

    async fn validate(
        &self,
        draft: &PostDraft,
    ) -> Result<(String, Option<Uuid>, Option<ImageUpload>), PostActionError> {
        let mut errors = PostFormErrors::default();

        let text = draft.text.trim().to_string();
        if text.is_empty() {
            errors.text = Some("Post text must not be empty.");
        }

        let group_id = match draft.group.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => match Uuid::parse_str(raw) {
                Ok(id) => match self.groups.find_by_id(id).await? {
                    Some(group) => Some(group.id),
                    None => {
                        errors.group = Some("Select a valid group.");
                        None
                    }
                },
                Err(_) => {
                    errors.group = Some("Select a valid group.");
                    None
                }
            },
        };

        let image = match &draft.image {
            None => None,
            Some(upload) => {
                if imagesize::blob_size(&upload.data).is_err() {
                    errors.image = Some("Upload a valid image file.");
                    None
                } else {
                    Some(upload.clone())
                }
            }
        };

        if errors.is_empty() {
            Ok((text, group_id, image))
        } else {
            Err(PostActionError::Invalid(errors))
        }
    }

    async fn store_image(&self, upload: ImageUpload) -> Result<String, MediaStorageError> {
        let stored = self.media.store(&upload.filename, upload.data).await?;
        Ok(stored.stored_path)
    }
}
