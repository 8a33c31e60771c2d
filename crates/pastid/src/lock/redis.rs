use crate::{Error, LockHolder, RefillLock, Result};
use async_trait::async_trait;
use core::time::Duration;
use redis::{Script, aio::ConnectionManager};

// Compare-and-delete in one round trip. A plain GET followed by DEL could
// remove a lock that expired and was re-acquired in between.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// A [`RefillLock`] implemented as a Redis string key with `SET NX PX`.
#[derive(Clone)]
pub struct RedisRefillLock {
    conn: ConnectionManager,
    key: String,
    release: Script,
}

impl RedisRefillLock {
    pub fn new(conn: ConnectionManager, key: impl Into<String>) -> Self {
        Self {
            conn,
            key: key.into(),
            release: Script::new(RELEASE_SCRIPT),
        }
    }
}

#[async_trait]
impl RefillLock for RedisRefillLock {
    async fn try_acquire(&self, holder: &LockHolder, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let millis = u64::try_from(ttl.as_millis())
            .unwrap_or(u64::MAX)
            .max(1);
        let reply: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg(holder.as_str())
            .arg("NX")
            .arg("PX")
            .arg(millis)
            .query_async(&mut conn)
            .await
            .map_err(Error::pool_unavailable)?;
        Ok(reply.is_some())
    }

    async fn release(&self, holder: &LockHolder) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release
            .key(&self.key)
            .arg(holder.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(Error::pool_unavailable)?;
        Ok(deleted == 1)
    }
}
