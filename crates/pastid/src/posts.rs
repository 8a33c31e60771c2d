//! Creating and reading posts.
//!
//! Short-lived posts (TTL at or below
//! [`PostPolicy::cache_ttl_threshold`]) are written only to the
//! [`ContentCache`] and expire there on their own. Everything else goes to
//! the durable [`ContentStore`] and gets a deletion job from the
//! [`ExpiryScheduler`]. A threshold of zero sends every post to the durable
//! store.

use crate::{
    AllocationService, Content, ContentCache, ContentStore, Error, ExpiryScheduler, Identifier,
    Result,
};
use chrono::Utc;
use core::time::Duration;
use std::sync::Arc;

/// Limits and storage split for posts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PostPolicy {
    /// Maximum body length in characters.
    pub max_text_len: usize,
    /// Maximum TTL in seconds.
    pub max_ttl: u32,
    /// Posts with a TTL up to this many seconds are cache-only.
    pub cache_ttl_threshold: u32,
    /// Upper bound on how long a durable post stays cached after a read.
    pub read_cache_ttl: Duration,
}

impl Default for PostPolicy {
    fn default() -> Self {
        Self {
            max_text_len: 500,
            max_ttl: 30 * 24 * 60 * 60,
            cache_ttl_threshold: 3600,
            read_cache_ttl: Duration::from_secs(600),
        }
    }
}

impl PostPolicy {
    /// Checks a body and TTL against the limits.
    pub fn validate(&self, body: &str, ttl_secs: u32) -> Result<()> {
        let len = body.chars().count();
        if len > self.max_text_len {
            return Err(Error::InvalidPost {
                reason: format!(
                    "text is {len} characters, at most {} allowed",
                    self.max_text_len
                ),
            });
        }
        if ttl_secs == 0 || ttl_secs > self.max_ttl {
            return Err(Error::InvalidPost {
                reason: format!("ttl must be between 1 and {} seconds", self.max_ttl),
            });
        }
        Ok(())
    }

    pub const fn tier_for(&self, ttl_secs: u32) -> StorageTier {
        if ttl_secs <= self.cache_ttl_threshold {
            StorageTier::Cache
        } else {
            StorageTier::Durable
        }
    }
}

/// Where a post was written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageTier {
    Cache,
    Durable,
}

impl StorageTier {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Durable => "durable",
        }
    }
}

/// A newly created post.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedPost {
    pub identifier: Identifier,
    pub tier: StorageTier,
}

/// Creates posts under freshly allocated identifiers and reads them back.
pub struct PostService {
    allocator: Arc<AllocationService>,
    store: Arc<dyn ContentStore>,
    cache: Arc<dyn ContentCache>,
    scheduler: Arc<dyn ExpiryScheduler>,
    policy: PostPolicy,
}

impl PostService {
    pub fn new(
        allocator: Arc<AllocationService>,
        store: Arc<dyn ContentStore>,
        cache: Arc<dyn ContentCache>,
        scheduler: Arc<dyn ExpiryScheduler>,
        policy: PostPolicy,
    ) -> Self {
        Self {
            allocator,
            store,
            cache,
            scheduler,
            policy,
        }
    }

    pub const fn policy(&self) -> &PostPolicy {
        &self.policy
    }

    pub fn allocator(&self) -> &Arc<AllocationService> {
        &self.allocator
    }

    /// Validates, allocates an identifier and stores the post.
    ///
    /// A durable post is written before its deletion job is scheduled. If
    /// scheduling fails the row is removed again and the error returned, so
    /// no durable post exists without a pending deletion.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self, body)))]
    pub async fn create(&self, body: String, ttl_secs: u32) -> Result<CreatedPost> {
        self.policy.validate(&body, ttl_secs)?;
        let identifier = self.allocator.allocate().await?.identifier;
        let tier = self.policy.tier_for(ttl_secs);

        match tier {
            StorageTier::Cache => {
                self.cache
                    .set(
                        &identifier,
                        &body,
                        Duration::from_secs(u64::from(ttl_secs)),
                    )
                    .await?;
            }
            StorageTier::Durable => {
                let content = Content::new(identifier.clone(), body, ttl_secs);
                self.store.put(&content).await?;
                if let Err(e) = self.scheduler.schedule_expiry(&identifier, ttl_secs).await {
                    if let Err(_rollback) = self.store.delete(&identifier).await {
                        #[cfg(feature = "tracing")]
                        tracing::error!(
                            "Post {identifier} stored without a deletion job: {_rollback}"
                        );
                    }
                    return Err(e);
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Created post {identifier} ({}, ttl {ttl_secs}s)", tier.as_str());
        Ok(CreatedPost { identifier, tier })
    }

    /// Returns the body of a live post, or `None` if it is unknown or has
    /// expired.
    pub async fn fetch(&self, id: &Identifier) -> Result<Option<String>> {
        match self.cache.get(id).await {
            Ok(Some(body)) => return Ok(Some(body)),
            Ok(None) => {}
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Cache read for {id} failed, using the store: {_e}");
            }
        }

        let Some(content) = self.store.get(id).await? else {
            return Ok(None);
        };
        // Expired rows may linger until the deletion job runs.
        let Some(remaining) = content.remaining(Utc::now()) else {
            return Ok(None);
        };

        let cache_for = remaining.min(self.policy.read_cache_ttl);
        if let Err(_e) = self.cache.set(id, &content.body, cache_for).await {
            #[cfg(feature = "tracing")]
            tracing::warn!("Failed to cache post {id}: {_e}");
        }
        Ok(Some(content.body))
    }
}
