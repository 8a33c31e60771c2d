//! Post storage collaborators.
//!
//! Posts live either in a durable [`ContentStore`] (deleted by the expiry
//! pipeline) or in a self-expiring [`ContentCache`]. Which one is used for a
//! given post is decided by [`crate::PostService`].

mod memory;
#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "redis")]
mod redis;

pub use memory::*;
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
#[cfg(feature = "postgres")]
pub use postgres::*;
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
#[cfg(feature = "redis")]
pub use self::redis::*;

use crate::{Identifier, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use core::time::Duration;

/// A stored post.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Content {
    pub identifier: Identifier,
    pub body: String,
    pub ttl_secs: u32,
    pub created_at: DateTime<Utc>,
}

impl Content {
    pub fn new(identifier: Identifier, body: String, ttl_secs: u32) -> Self {
        Self {
            identifier,
            body,
            ttl_secs,
            created_at: Utc::now(),
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + TimeDelta::seconds(i64::from(self.ttl_secs))
    }

    /// Time left before expiry, or `None` once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        (self.expires_at() - now)
            .to_std()
            .ok()
            .filter(|d| !d.is_zero())
    }
}

/// Durable post storage.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Writes a new post.
    async fn put(&self, content: &Content) -> Result<()>;

    /// Reads a post, expired or not.
    async fn get(&self, id: &Identifier) -> Result<Option<Content>>;

    /// Deletes a post. Returns whether a row was removed; deleting an absent
    /// post is not an error.
    async fn delete(&self, id: &Identifier) -> Result<bool>;
}

/// A fast cache whose entries expire on their own.
#[async_trait]
pub trait ContentCache: Send + Sync {
    async fn get(&self, id: &Identifier) -> Result<Option<String>>;

    /// Stores `body` for `ttl`. A zero `ttl` stores nothing.
    async fn set(&self, id: &Identifier, body: &str, ttl: Duration) -> Result<()>;
}
