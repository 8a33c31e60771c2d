//! Time-bounded mutual exclusion for pool refills.
//!
//! A [`RefillLock`] is a single named token with a holder value and an
//! expiry. Acquisition is one non-blocking attempt; release only succeeds
//! for the holder that still owns the token. An expired token is free for
//! anybody to take, which bounds the damage of a holder that crashes
//! mid-refill.

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::*;
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
#[cfg(feature = "redis")]
pub use self::redis::*;

use crate::Result;
use async_trait::async_trait;
use core::{fmt, time::Duration};

/// A unique value identifying one lock holder for one refill cycle.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LockHolder(String);

impl LockHolder {
    /// Generates a fresh, random holder value.
    pub fn generate() -> Self {
        Self(format!("{:032x}", rand::random::<u128>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LockHolder {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for LockHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A distributed set-if-not-exists lock with expiry.
#[async_trait]
pub trait RefillLock: Send + Sync {
    /// Takes the lock for `holder` if no live holder exists.
    ///
    /// Returns `Ok(false)` when somebody else holds it. This is a single
    /// attempt and never waits.
    async fn try_acquire(&self, holder: &LockHolder, ttl: Duration) -> Result<bool>;

    /// Releases the lock if, and only if, `holder` still owns it.
    ///
    /// Returns `Ok(false)` if the lock had already expired or was taken over.
    async fn release(&self, holder: &LockHolder) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(10);

    #[test]
    fn generated_holders_are_distinct() {
        let a = LockHolder::generate();
        let b = LockHolder::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[tokio::test(start_paused = true)]
    async fn second_holder_is_denied_while_live() {
        let lock = MemoryRefillLock::new();
        let a = LockHolder::from("a");
        let b = LockHolder::from("b");

        assert!(lock.try_acquire(&a, TTL).await.unwrap());
        assert!(!lock.try_acquire(&b, TTL).await.unwrap());
        assert!(!lock.try_acquire(&a, TTL).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn crashed_holder_is_reclaimable_only_after_expiry() {
        let lock = MemoryRefillLock::new();
        let crashed = LockHolder::from("crashed");
        let next = LockHolder::from("next");

        assert!(lock.try_acquire(&crashed, TTL).await.unwrap());

        tokio::time::advance(TTL - Duration::from_millis(1)).await;
        assert!(!lock.try_acquire(&next, TTL).await.unwrap());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(lock.try_acquire(&next, TTL).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn release_only_by_owner() {
        let lock = MemoryRefillLock::new();
        let a = LockHolder::from("a");
        let b = LockHolder::from("b");

        assert!(lock.try_acquire(&a, TTL).await.unwrap());
        assert!(!lock.release(&b).await.unwrap());
        assert!(!lock.try_acquire(&b, TTL).await.unwrap());

        assert!(lock.release(&a).await.unwrap());
        assert!(lock.try_acquire(&b, TTL).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_owner_cannot_release_successor() {
        let lock = MemoryRefillLock::new();
        let stale = LockHolder::from("stale");
        let successor = LockHolder::from("successor");

        assert!(lock.try_acquire(&stale, TTL).await.unwrap());
        tokio::time::advance(TTL).await;
        assert!(lock.try_acquire(&successor, TTL).await.unwrap());

        assert!(!lock.release(&stale).await.unwrap());
        assert!(!lock.try_acquire(&stale, TTL).await.unwrap());
        assert!(lock.release(&successor).await.unwrap());
    }
}
