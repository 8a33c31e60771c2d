use crate::{Error, Identifier, IdentifierPool, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;

/// An [`IdentifierPool`] stored in a Redis list.
///
/// `LPUSH` with many values, `RPOP` and `LLEN` are each a single atomic
/// command, so the pool is safe to share between any number of processes
/// without extra coordination.
#[derive(Clone)]
pub struct RedisPool {
    conn: ConnectionManager,
    key: String,
}

impl RedisPool {
    pub fn new(conn: ConnectionManager, key: impl Into<String>) -> Self {
        Self {
            conn,
            key: key.into(),
        }
    }
}

#[async_trait]
impl IdentifierPool for RedisPool {
    async fn try_pop(&self) -> Result<Option<Identifier>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("RPOP")
            .arg(&self.key)
            .query_async(&mut conn)
            .await
            .map_err(Error::pool_unavailable)?;

        match raw {
            Some(raw) => match Identifier::parse(&raw) {
                Ok(id) => Ok(Some(id)),
                Err(_e) => {
                    // Somebody wrote garbage into the pool key; skip it rather
                    // than hand it out.
                    #[cfg(feature = "tracing")]
                    tracing::error!("Discarding invalid pool entry {raw:?}: {_e}");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn push_many(&self, ids: Vec<Identifier>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let values: Vec<String> = ids.into_iter().map(String::from).collect();
        let _len: usize = redis::cmd("LPUSH")
            .arg(&self.key)
            .arg(values)
            .query_async(&mut conn)
            .await
            .map_err(Error::pool_unavailable)?;
        Ok(())
    }

    async fn size(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        redis::cmd("LLEN")
            .arg(&self.key)
            .query_async(&mut conn)
            .await
            .map_err(Error::pool_unavailable)
    }
}
