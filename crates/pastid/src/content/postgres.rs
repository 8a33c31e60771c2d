use crate::{Content, ContentStore, Error, Identifier, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

/// A [`ContentStore`] backed by the `posts` table.
#[derive(Clone, Debug)]
pub struct PgContentStore {
    pool: PgPool,
}

impl PgContentStore {
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the `posts` table if it is missing.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS posts (
                hash TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                ttl INTEGER NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(Error::store_unavailable)?;

        #[cfg(feature = "tracing")]
        tracing::info!("Table 'posts' is ready");
        Ok(())
    }
}

#[async_trait]
impl ContentStore for PgContentStore {
    async fn put(&self, content: &Content) -> Result<()> {
        let ttl = i32::try_from(content.ttl_secs).map_err(Error::store_unavailable)?;
        sqlx::query("INSERT INTO posts (hash, text, ttl, created_at) VALUES ($1, $2, $3, $4)")
            .bind(content.identifier.as_str())
            .bind(&content.body)
            .bind(ttl)
            .bind(content.created_at)
            .execute(&self.pool)
            .await
            .map_err(Error::store_unavailable)?;
        Ok(())
    }

    async fn get(&self, id: &Identifier) -> Result<Option<Content>> {
        let row = sqlx::query("SELECT text, ttl, created_at FROM posts WHERE hash = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::store_unavailable)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let body: String = row.try_get("text").map_err(Error::store_unavailable)?;
        let ttl: i32 = row.try_get("ttl").map_err(Error::store_unavailable)?;
        let created_at: DateTime<Utc> =
            row.try_get("created_at").map_err(Error::store_unavailable)?;

        Ok(Some(Content {
            identifier: id.clone(),
            body,
            ttl_secs: u32::try_from(ttl).unwrap_or_default(),
            created_at,
        }))
    }

    async fn delete(&self, id: &Identifier) -> Result<bool> {
        let done = sqlx::query("DELETE FROM posts WHERE hash = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::DeleteFailed {
                identifier: id.to_string(),
                context: e.to_string(),
            })?;
        Ok(done.rows_affected() > 0)
    }
}
