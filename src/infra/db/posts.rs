use async_trait::async_trait;
use sqlx::QueryBuilder;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{
    CreatePostParams, FeedScope, PostListing, PostsRepo, RepoError, UpdatePostParams,
};
use crate::domain::entities::PostRecord;

use super::PostgresRepositories;
use super::util::map_sqlx_error;

const LISTING_SELECT: &str = "SELECT p.id, p.text, p.pub_date, p.author_id, p.group_id, \
     p.image_path, u.username AS author_username, g.title AS group_title, g.slug AS group_slug \
     FROM posts p \
     INNER JOIN users u ON u.id = p.author_id \
     LEFT JOIN groups g ON g.id = p.group_id \
     WHERE 1=1 ";

const POST_COLUMNS: &str = "id, text, pub_date, author_id, group_id, image_path";

#[derive(sqlx::FromRow)]
struct PostListingRow {
    id: Uuid,
    text: String,
    pub_date: OffsetDateTime,
    author_id: Uuid,
    group_id: Option<Uuid>,
    image_path: Option<String>,
    author_username: String,
    group_title: Option<String>,
    group_slug: Option<String>,
}

impl From<PostListingRow> for PostListing {
    fn from(row: PostListingRow) -> Self {
        Self {
            post: PostRecord {
                id: row.id,
                text: row.text,
                pub_date: row.pub_date,
                author_id: row.author_id,
                group_id: row.group_id,
                image_path: row.image_path,
            },
            author_username: row.author_username,
            group_title: row.group_title,
            group_slug: row.group_slug,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PostRow {
    id: Uuid,
    text: String,
    pub_date: OffsetDateTime,
    author_id: Uuid,
    group_id: Option<Uuid>,
    image_path: Option<String>,
}

impl From<PostRow> for PostRecord {
    fn from(row: PostRow) -> Self {
        Self {
            id: row.id,
            text: row.text,
            pub_date: row.pub_date,
            author_id: row.author_id,
            group_id: row.group_id,
            image_path: row.image_path,
        }
    }
}

#[async_trait]
impl PostsRepo for PostgresRepositories {
    async fn list_posts(
        &self,
        scope: FeedScope,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<PostListing>, RepoError> {
        let mut qb = QueryBuilder::new(LISTING_SELECT);
        Self::apply_scope_condition(&mut qb, scope);
        qb.push(" ORDER BY p.pub_date DESC LIMIT ");
        qb.push_bind(i64::from(limit.clamp(1, 100)));
        qb.push(" OFFSET ");
        qb.push_bind(i64::try_from(offset).map_err(|_| {
            RepoError::from_persistence("offset exceeds supported range")
        })?);

        let rows = qb
            .build_query_as::<PostListingRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn count_posts(&self, scope: FeedScope) -> Result<u64, RepoError> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM posts p WHERE 1=1 ");
        Self::apply_scope_condition(&mut qb, scope);

        let count: i64 = qb
            .build_query_scalar()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Self::convert_count(count)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PostListing>, RepoError> {
        let mut qb = QueryBuilder::new(LISTING_SELECT);
        qb.push(" AND p.id = ");
        qb.push_bind(id);

        let row = qb
            .build_query_as::<PostListingRow>()
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(Into::into))
    }

    async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, RepoError> {
        let mut qb = QueryBuilder::new(
            "INSERT INTO posts (id, text, author_id, group_id, image_path) VALUES (",
        );
        qb.push_bind(Uuid::new_v4());
        qb.push(", ");
        qb.push_bind(params.text);
        qb.push(", ");
        qb.push_bind(params.author_id);
        qb.push(", ");
        qb.push_bind(params.group_id);
        qb.push(", ");
        qb.push_bind(params.image_path);
        qb.push(") RETURNING ");
        qb.push(POST_COLUMNS);

        let row = qb
            .build_query_as::<PostRow>()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn update_post(&self, params: UpdatePostParams) -> Result<PostRecord, RepoError> {
        // pub_date is deliberately left untouched; edits keep feed position.
        let mut qb = QueryBuilder::new("UPDATE posts SET text = ");
        qb.push_bind(params.text);
        qb.push(", group_id = ");
        qb.push_bind(params.group_id);
        if let Some(image_path) = params.image_path {
            qb.push(", image_path = ");
            qb.push_bind(image_path);
        }
        qb.push(" WHERE id = ");
        qb.push_bind(params.id);
        qb.push(" RETURNING ");
        qb.push(POST_COLUMNS);

        let row = qb
            .build_query_as::<PostRow>()
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?
            .ok_or(RepoError::NotFound)?;
        Ok(row.into())
    }

    async fn delete_post(&self, id: Uuid) -> Result<(), RepoError> {
        // comments.post_id is ON DELETE CASCADE.
        let mut qb = QueryBuilder::new("DELETE FROM posts WHERE id = ");
        qb.push_bind(id);

        let result = qb
            .build()
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}
