use async_trait::async_trait;
use sqlx::QueryBuilder;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{CreateGroupParams, GroupsRepo, RepoError};
use crate::domain::entities::GroupRecord;

use super::PostgresRepositories;
use super::util::map_sqlx_error;

const GROUP_COLUMNS: &str = "id, title, slug, description, created_at";

#[derive(sqlx::FromRow)]
struct GroupRow {
    id: Uuid,
    title: String,
    slug: String,
    description: String,
    created_at: OffsetDateTime,
}

impl From<GroupRow> for GroupRecord {
    fn from(row: GroupRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            slug: row.slug,
            description: row.description,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl GroupsRepo for PostgresRepositories {
    async fn create_group(&self, params: CreateGroupParams) -> Result<GroupRecord, RepoError> {
        let mut qb =
            QueryBuilder::new("INSERT INTO groups (id, title, slug, description) VALUES (");
        qb.push_bind(Uuid::new_v4());
        qb.push(", ");
        qb.push_bind(params.title);
        qb.push(", ");
        qb.push_bind(params.slug);
        qb.push(", ");
        qb.push_bind(params.description);
        qb.push(") RETURNING ");
        qb.push(GROUP_COLUMNS);

        let row = qb
            .build_query_as::<GroupRow>()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<GroupRecord>, RepoError> {
        let mut qb = QueryBuilder::new("SELECT ");
        qb.push(GROUP_COLUMNS);
        qb.push(" FROM groups WHERE slug = ");
        qb.push_bind(slug);

        let row = qb
            .build_query_as::<GroupRow>()
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(Into::into))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<GroupRecord>, RepoError> {
        let mut qb = QueryBuilder::new("SELECT ");
        qb.push(GROUP_COLUMNS);
        qb.push(" FROM groups WHERE id = ");
        qb.push_bind(id);

        let row = qb
            .build_query_as::<GroupRow>()
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(Into::into))
    }

    async fn list_groups(&self) -> Result<Vec<GroupRecord>, RepoError> {
        let mut qb = QueryBuilder::new("SELECT ");
        qb.push(GROUP_COLUMNS);
        qb.push(" FROM groups ORDER BY title");

        let rows = qb
            .build_query_as::<GroupRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete_group(&self, slug: &str) -> Result<(), RepoError> {
        // posts.group_id is ON DELETE SET NULL; orphaned posts stay visible
        // in the global and author feeds.
        let mut qb = QueryBuilder::new("DELETE FROM groups WHERE slug = ");
        qb.push_bind(slug);

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
