use async_trait::async_trait;
use sqlx::QueryBuilder;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{
    CommentListing, CommentsRepo, CreateCommentParams, RepoError,
};
use crate::domain::entities::CommentRecord;

use super::PostgresRepositories;
use super::util::map_sqlx_error;

#[derive(sqlx::FromRow)]
struct CommentListingRow {
    id: Uuid,
    text: String,
    post_id: Uuid,
    author_id: Uuid,
    created: OffsetDateTime,
    author_username: String,
}

impl From<CommentListingRow> for CommentListing {
    fn from(row: CommentListingRow) -> Self {
        Self {
            comment: CommentRecord {
                id: row.id,
                text: row.text,
                post_id: row.post_id,
                author_id: row.author_id,
                created: row.created,
            },
            author_username: row.author_username,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CommentRow {
    id: Uuid,
    text: String,
    post_id: Uuid,
    author_id: Uuid,
    created: OffsetDateTime,
}

impl From<CommentRow> for CommentRecord {
    fn from(row: CommentRow) -> Self {
        Self {
            id: row.id,
            text: row.text,
            post_id: row.post_id,
            author_id: row.author_id,
            created: row.created,
        }
    }
}

#[async_trait]
impl CommentsRepo for PostgresRepositories {
    async fn list_for_post(&self, post_id: Uuid) -> Result<Vec<CommentListing>, RepoError> {
        let mut qb = QueryBuilder::new(
            "SELECT c.id, c.text, c.post_id, c.author_id, c.created, \
             u.username AS author_username \
             FROM comments c \
             INNER JOIN users u ON u.id = c.author_id \
             WHERE c.post_id = ",
        );
        qb.push_bind(post_id);
        qb.push(" ORDER BY c.created");

        let rows = qb
            .build_query_as::<CommentListingRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn create_comment(
        &self,
        params: CreateCommentParams,
    ) -> Result<CommentRecord, RepoError> {
        let mut qb =
            QueryBuilder::new("INSERT INTO comments (id, text, post_id, author_id) VALUES (");
        qb.push_bind(Uuid::new_v4());
        qb.push(", ");
        qb.push_bind(params.text);
        qb.push(", ");
        qb.push_bind(params.post_id);
        qb.push(", ");
        qb.push_bind(params.author_id);
        qb.push(") RETURNING id, text, post_id, author_id, created");

        let row = qb
            .build_query_as::<CommentRow>()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.into())
    }
}
