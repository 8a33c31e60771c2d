use crate::{Error, Result, SequenceSource};
use async_trait::async_trait;
use sqlx::PgPool;

/// A [`SequenceSource`] backed by a PostgreSQL `SEQUENCE`.
///
/// `nextval` is atomic and never hands out the same value twice, even across
/// concurrent sessions and server restarts. Batches are fetched in a single
/// round trip with `generate_series`.
#[derive(Clone, Debug)]
pub struct PgSequence {
    pool: PgPool,
    name: String,
}

impl PgSequence {
    /// Wraps an existing connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceUnavailable`] if `name` is not a plain SQL
    /// identifier. The name is interpolated into DDL and must not need
    /// quoting.
    pub fn new(pool: PgPool, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if !is_plain_identifier(&name) {
            return Err(Error::SourceUnavailable {
                context: format!("invalid sequence name `{name}`"),
            });
        }
        Ok(Self { pool, name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl SequenceSource for PgSequence {
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self), fields(sequence = %self.name)))]
    async fn ensure_exists(&self) -> Result<()> {
        let ddl = format!(
            "CREATE SEQUENCE IF NOT EXISTS {} \
             START WITH 1 INCREMENT BY 1 MINVALUE 1 NO MAXVALUE CACHE 1",
            self.name
        );
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(Error::source_unavailable)?;

        #[cfg(feature = "tracing")]
        tracing::info!("Sequence '{}' is ready", self.name);
        Ok(())
    }

    async fn allocate_batch(&self, n: usize) -> Result<Vec<u64>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let count = i64::try_from(n).map_err(Error::source_unavailable)?;
        let mut values: Vec<i64> =
            sqlx::query_scalar("SELECT nextval($1::regclass) FROM generate_series(1, $2)")
                .bind(&self.name)
                .bind(count)
                .fetch_all(&self.pool)
                .await
                .map_err(Error::source_unavailable)?;

        if values.len() != n {
            return Err(Error::SourceUnavailable {
                context: format!("requested {n} values, received {}", values.len()),
            });
        }
        values.sort_unstable();

        values
            .into_iter()
            .map(|v| u64::try_from(v).map_err(Error::source_unavailable))
            .collect()
    }
}

/// Whether `name` can be used unquoted as a PostgreSQL identifier.
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && name.len() <= 63
}
