use crate::server::config::{BackendConfig, RemoteUrls, ServerConfig};
use anyhow::Context;
use pastid::{
    AmqpExpiryScheduler, AmqpTopology, ContentCache, ContentStore, Error, ExpiryScheduler,
    IdentifierPool, MemoryContentCache, MemoryContentStore, MemoryDelayQueue, MemoryDeliveries,
    MemoryPool, MemoryRefillLock, MemorySequence, PgContentStore, PgSequence, RedisContentCache,
    RedisPool, RedisRefillLock, RefillLock, RetryPolicy, SequenceSource,
};
use redis::aio::ConnectionManager;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::sync::Arc;

/// The in-process delay queue used when no broker is configured. Its
/// consumer runs inside the server.
pub struct LocalExpiry {
    pub queue: MemoryDelayQueue,
    pub deliveries: MemoryDeliveries,
}

/// Connected client handles for every collaborator of the server.
pub struct Backends {
    pub source: Arc<dyn SequenceSource>,
    pub pool: Arc<dyn IdentifierPool>,
    pub lock: Arc<dyn RefillLock>,
    pub store: Arc<dyn ContentStore>,
    pub cache: Arc<dyn ContentCache>,
    pub scheduler: Arc<dyn ExpiryScheduler>,
    pub local_expiry: Option<LocalExpiry>,
}

impl Backends {
    /// Process-local backends for tests and `--in-memory` runs.
    pub fn in_memory() -> Self {
        let (queue, deliveries) = MemoryDelayQueue::new();
        Self {
            source: Arc::new(MemorySequence::new()),
            pool: Arc::new(MemoryPool::new()),
            lock: Arc::new(MemoryRefillLock::new()),
            store: Arc::new(MemoryContentStore::new()),
            cache: Arc::new(MemoryContentCache::new()),
            scheduler: Arc::new(queue.clone()),
            local_expiry: Some(LocalExpiry { queue, deliveries }),
        }
    }

    /// Connects to every configured backend, retrying each connection with
    /// the startup policy, and makes sure the sequence and `posts` table
    /// exist.
    pub async fn connect(config: &ServerConfig) -> anyhow::Result<Self> {
        let urls = match &config.backends {
            BackendConfig::InMemory => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Running with in-memory backends; nothing is persisted");
                return Ok(Self::in_memory());
            }
            BackendConfig::Remote(urls) => urls,
        };
        let retry = config.startup_retry;

        let seq_pool = connect_postgres(&retry, &urls.database_url)
            .await
            .context("sequence database unreachable")?;
        let source = PgSequence::new(seq_pool.clone(), config.sequence_name.as_str())?;
        retry
            .run("create sequence", || source.ensure_exists())
            .await?;

        let store = PgContentStore::new(if urls.database_url_text == urls.database_url {
            seq_pool
        } else {
            connect_postgres(&retry, &urls.database_url_text)
                .await
                .context("content database unreachable")?
        });
        retry
            .run("create posts table", || store.ensure_schema())
            .await?;

        let hash_conn = connect_redis(&retry, &urls.redis_url_hash)
            .await
            .context("pool store unreachable")?;
        let text_conn = if urls.redis_url_text == urls.redis_url_hash {
            hash_conn.clone()
        } else {
            connect_redis(&retry, &urls.redis_url_text)
                .await
                .context("content cache unreachable")?
        };

        let scheduler = connect_broker(&retry, urls, &config.topology, config.remote_retry)
            .await
            .context("broker unreachable")?;

        #[cfg(feature = "tracing")]
        tracing::info!("Connected to all backends");

        Ok(Self {
            source: Arc::new(source),
            pool: Arc::new(RedisPool::new(hash_conn.clone(), config.pool_key.as_str())),
            lock: Arc::new(RedisRefillLock::new(hash_conn, config.lock_key.as_str())),
            store: Arc::new(store),
            cache: Arc::new(RedisContentCache::new(text_conn)),
            scheduler: Arc::new(scheduler),
            local_expiry: None,
        })
    }
}

pub async fn connect_postgres(retry: &RetryPolicy, url: &str) -> pastid::Result<PgPool> {
    retry
        .run("connect to postgres", move || async move {
            PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .map_err(|e| Error::StoreUnavailable {
                    context: e.to_string(),
                })
        })
        .await
}

async fn connect_redis(retry: &RetryPolicy, url: &str) -> pastid::Result<ConnectionManager> {
    let client = redis::Client::open(url).map_err(|e| Error::PoolUnavailable {
        context: e.to_string(),
    })?;
    let client = &client;
    retry
        .run("connect to redis", move || async move {
            client
                .get_connection_manager()
                .await
                .map_err(|e| Error::PoolUnavailable {
                    context: e.to_string(),
                })
        })
        .await
}

async fn connect_broker(
    retry: &RetryPolicy,
    urls: &RemoteUrls,
    topology: &AmqpTopology,
    reconnect: RetryPolicy,
) -> pastid::Result<AmqpExpiryScheduler> {
    retry
        .run("connect to rabbitmq", || {
            AmqpExpiryScheduler::connect(&urls.rabbitmq_url, topology.clone(), reconnect)
        })
        .await
}
