use async_trait::async_trait;
use sqlx::QueryBuilder;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{CreateSessionParams, RepoError, SessionsRepo};
use crate::domain::entities::SessionRecord;

use super::PostgresRepositories;
use super::util::map_sqlx_error;

const SESSION_COLUMNS: &str = "id, token_prefix, hashed_secret, user_id, created_at, last_seen_at";

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    token_prefix: String,
    hashed_secret: String,
    user_id: Uuid,
    created_at: OffsetDateTime,
    last_seen_at: Option<OffsetDateTime>,
}

impl From<SessionRow> for SessionRecord {
    fn from(row: SessionRow) -> Self {
        Self {
            id: row.id,
            token_prefix: row.token_prefix,
            hashed_secret: row.hashed_secret,
            user_id: row.user_id,
            created_at: row.created_at,
            last_seen_at: row.last_seen_at,
        }
    }
}

#[async_trait]
impl SessionsRepo for PostgresRepositories {
    async fn insert_session(
        &self,
        params: CreateSessionParams,
    ) -> Result<SessionRecord, RepoError> {
        let mut qb = QueryBuilder::new(
            "INSERT INTO sessions (id, token_prefix, hashed_secret, user_id) VALUES (",
        );
        qb.push_bind(Uuid::new_v4());
        qb.push(", ");
        qb.push_bind(params.token_prefix);
        qb.push(", ");
        qb.push_bind(params.hashed_secret);
        qb.push(", ");
        qb.push_bind(params.user_id);
        qb.push(") RETURNING ");
        qb.push(SESSION_COLUMNS);

        let row = qb
            .build_query_as::<SessionRow>()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn find_by_prefix(&self, prefix: &str) -> Result<Option<SessionRecord>, RepoError> {
        let mut qb = QueryBuilder::new("SELECT ");
        qb.push(SESSION_COLUMNS);
        qb.push(" FROM sessions WHERE token_prefix = ");
        qb.push_bind(prefix);

        let row = qb
            .build_query_as::<SessionRow>()
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(Into::into))
    }

    async fn delete_session(&self, id: Uuid) -> Result<(), RepoError> {
        let mut qb = QueryBuilder::new("DELETE FROM sessions WHERE id = ");
        qb.push_bind(id);

        qb.build()
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn update_last_seen(
        &self,
        id: Uuid,
        last_seen_at: OffsetDateTime,
    ) -> Result<(), RepoError> {
        let mut qb = QueryBuilder::new("UPDATE sessions SET last_seen_at = ");
        qb.push_bind(last_seen_at);
        qb.push(" WHERE id = ");
        qb.push_bind(id);

        qb.build()
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}
