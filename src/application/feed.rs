//! Read side of the feeds: global, per-group, and per-author listings.

use std::num::NonZeroU32;
use std::sync::Arc;

use thiserror::Error;

use crate::application::pagination::{Page, PageError, PageNumber};
use crate::application::repos::{
    FeedScope, GroupsRepo, PostListing, PostsRepo, RepoError, UsersRepo,
};
use crate::domain::entities::{GroupRecord, UserRecord};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("unknown group")]
    UnknownGroup,
    #[error("unknown author")]
    UnknownAuthor,
    #[error(transparent)]
    Page(#[from] PageError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// A page of the group feed together with the group it belongs to.
#[derive(Debug, Clone)]
pub struct GroupFeed {
    pub group: GroupRecord,
    pub page: Page<PostListing>,
}

/// A page of one author's posts plus their all-time total.
#[derive(Debug, Clone)]
pub struct ProfileFeed {
    pub author: UserRecord,
    pub total_posts: u64,
    pub page: Page<PostListing>,
}

#[derive(Clone)]
pub struct FeedService {
    posts: Arc<dyn PostsRepo>,
    groups: Arc<dyn GroupsRepo>,
    users: Arc<dyn UsersRepo>,
    page_size: NonZeroU32,
}

impl FeedService {
    pub fn new(
        posts: Arc<dyn PostsRepo>,
        groups: Arc<dyn GroupsRepo>,
        users: Arc<dyn UsersRepo>,
        page_size: NonZeroU32,
    ) -> Self {
        Self {
            posts,
            groups,
            users,
            page_size,
        }
    }

    pub fn page_size(&self) -> NonZeroU32 {
        self.page_size
    }

    pub async fn global_feed(&self, number: PageNumber) -> Result<Page<PostListing>, FeedError> {
        self.feed_page(FeedScope::Global, number).await
    }

    pub async fn group_feed(
        &self,
        slug: &str,
        number: PageNumber,
    ) -> Result<GroupFeed, FeedError> {
        let group = self
            .groups
            .find_by_slug(slug)
            .await?
            .ok_or(FeedError::UnknownGroup)?;
        let page = self.feed_page(FeedScope::Group(group.id), number).await?;
        Ok(GroupFeed { group, page })
    }

    pub async fn profile_feed(
        &self,
        username: &str,
        number: PageNumber,
    ) -> Result<ProfileFeed, FeedError> {
        let author = self
            .users
            .find_by_username(username)
            .await?
            .ok_or(FeedError::UnknownAuthor)?;
        let scope = FeedScope::Author(author.id);
        let total_posts = self.posts.count_posts(scope).await?;
        let page = self.assemble(scope, number, total_posts).await?;
        Ok(ProfileFeed {
            author,
            total_posts,
            page,
        })
    }

    async fn feed_page(
        &self,
        scope: FeedScope,
        number: PageNumber,
    ) -> Result<Page<PostListing>, FeedError> {
        let total = self.posts.count_posts(scope).await?;
        self.assemble(scope, number, total).await
    }

    async fn assemble(
        &self,
        scope: FeedScope,
        number: PageNumber,
        total: u64,
    ) -> Result<Page<PostListing>, FeedError> {
        // Validate the page number before touching the listing query so a
        // past-the-end request never issues a pointless SELECT.
        let probe = Page::<PostListing>::assemble(Vec::new(), number, self.page_size, total)?;
        if probe.total_items == 0 {
            return Ok(probe);
        }
        let items = self
            .posts
            .list_posts(scope, self.page_size.get(), number.offset(self.page_size))
            .await?;
        tracing::debug!(
            scope = ?scope,
            page = number.get(),
            items = items.len(),
            total,
            "assembled feed page"
        );
        Page::assemble(items, number, self.page_size, total).map_err(FeedError::from)
    }
}
