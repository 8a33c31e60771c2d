use crate::{LockHolder, RefillLock, Result};
use async_trait::async_trait;
use core::time::Duration;
use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct Lease {
    holder: LockHolder,
    expires_at: Instant,
}

impl Lease {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// A process-local [`RefillLock`].
///
/// Expiry is measured with the tokio clock so tests can pause and advance
/// time deterministically.
#[derive(Debug, Default)]
pub struct MemoryRefillLock {
    lease: Mutex<Option<Lease>>,
}

impl MemoryRefillLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RefillLock for MemoryRefillLock {
    async fn try_acquire(&self, holder: &LockHolder, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut lease = self.lease.lock();
        if lease.as_ref().is_some_and(|l| l.is_live(now)) {
            return Ok(false);
        }
        *lease = Some(Lease {
            holder: holder.clone(),
            expires_at: now + ttl,
        });
        Ok(true)
    }

    async fn release(&self, holder: &LockHolder) -> Result<bool> {
        let now = Instant::now();
        let mut lease = self.lease.lock();
        match lease.as_ref() {
            Some(l) if l.is_live(now) && &l.holder == holder => {
                *lease = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
