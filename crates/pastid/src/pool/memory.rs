use crate::{Identifier, IdentifierPool, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// A process-local [`IdentifierPool`] guarded by a single mutex.
///
/// Pushes go to the front and pops come from the back, mirroring the
/// `LPUSH`/`RPOP` pairing of [`crate::RedisPool`].
#[derive(Debug, Default)]
pub struct MemoryPool {
    ids: Mutex<VecDeque<Identifier>>,
}

impl MemoryPool {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentifierPool for MemoryPool {
    async fn try_pop(&self) -> Result<Option<Identifier>> {
        Ok(self.ids.lock().pop_back())
    }

    async fn push_many(&self, ids: Vec<Identifier>) -> Result<()> {
        let mut guard = self.ids.lock();
        for id in ids {
            guard.push_front(id);
        }
        Ok(())
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.ids.lock().len())
    }
}
