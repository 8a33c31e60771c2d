use crate::{ContentCache, Error, Identifier, Result};
use async_trait::async_trait;
use core::time::Duration;
use redis::aio::ConnectionManager;

/// A [`ContentCache`] of plain Redis string keys with `EX` expiry.
#[derive(Clone)]
pub struct RedisContentCache {
    conn: ConnectionManager,
}

impl RedisContentCache {
    pub const fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ContentCache for RedisContentCache {
    async fn get(&self, id: &Identifier) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(id.as_str())
            .query_async(&mut conn)
            .await
            .map_err(Error::store_unavailable)
    }

    async fn set(&self, id: &Identifier, body: &str, ttl: Duration) -> Result<()> {
        // Redis rejects EX 0.
        let secs = ttl.as_secs();
        if secs == 0 {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(id.as_str())
            .arg(body)
            .arg("EX")
            .arg(secs)
            .query_async(&mut conn)
            .await
            .map_err(Error::store_unavailable)?;
        Ok(())
    }
}
